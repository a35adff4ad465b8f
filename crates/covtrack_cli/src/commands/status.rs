//! Status command implementation.

use crate::error::{CliError, CliResult};
use crate::store::{FileClockStore, FileStore};
use chrono::{DateTime, Utc};
use covtrack_sync::{CacheGate, ClockStore, LocalStore, SyncConfig, SyncError};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Cache status of a data directory.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Data directory.
    pub path: String,
    /// Last successful sync (RFC 3339).
    pub last_successful_sync: Option<String>,
    /// Minutes since the last successful sync.
    pub age_minutes: Option<i64>,
    /// Whether snapshot queries would refresh.
    pub expired: bool,
    /// Number of stored days.
    pub stored_dates: usize,
    /// Earliest stored day.
    pub first_date: Option<String>,
    /// Latest stored day.
    pub last_date: Option<String>,
    /// Number of stored records.
    pub records: usize,
}

/// Collects the status of the data directory at `path` as of `now`.
pub async fn collect(path: &Path, now: DateTime<Utc>) -> CliResult<StatusReport> {
    if !path.exists() {
        return Err(CliError::InvalidArgument(format!(
            "No data directory found at {}",
            path.display()
        )));
    }

    let store = FileStore::open(path).await.map_err(SyncError::from)?;
    let clock = FileClockStore::open(path)
        .read()
        .await
        .map_err(SyncError::from)?;
    let dates = store.list_present_dates().await.map_err(SyncError::from)?;
    let gate = CacheGate::new(SyncConfig::default().cache_ttl);
    if store.is_empty() {
        debug!(path = %path.display(), "no records stored yet");
    }

    Ok(StatusReport {
        path: path.display().to_string(),
        last_successful_sync: clock.last_successful_sync.map(|at| at.to_rfc3339()),
        age_minutes: clock.age(now).map(|age| age.num_minutes()),
        expired: gate.is_expired(&clock, now),
        stored_dates: dates.len(),
        first_date: dates.first().map(ToString::to_string),
        last_date: dates.last().map(ToString::to_string),
        records: store.len(),
    })
}

/// Runs the status command.
pub async fn run(path: &Path, format: &str) -> CliResult<()> {
    let report = collect(path, Utc::now()).await?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(&report),
    }
    Ok(())
}

fn print_text_output(report: &StatusReport) {
    println!("covtrack status");
    println!("===============");
    println!();
    println!("Path: {}", report.path);
    println!();
    println!("Cache:");
    match (&report.last_successful_sync, report.age_minutes) {
        (Some(at), Some(age)) => println!("  Last sync:  {at} ({age} min ago)"),
        _ => println!("  Last sync:  never"),
    }
    println!(
        "  State:      {}",
        if report.expired { "expired" } else { "fresh" }
    );
    println!();
    println!("Storage:");
    println!("  Days:       {}", report.stored_dates);
    if let (Some(first), Some(last)) = (&report.first_date, &report.last_date) {
        println!("  Range:      {first} .. {last}");
    }
    println!("  Records:    {}", report.records);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use covtrack_testkit::{date, sample_report, TestDataDir};

    #[tokio::test]
    async fn reports_clock_and_storage() {
        let data = TestDataDir::new();
        let synced = Utc.with_ymd_and_hms(2020, 4, 26, 12, 0, 0).unwrap();
        {
            let store = FileStore::open(data.path()).await.unwrap();
            store.write_batch(&sample_report(date("2020-04-25"))).await.unwrap();
            store.write_batch(&sample_report(date("2020-04-26"))).await.unwrap();
            FileClockStore::open(data.path()).write(synced).await.unwrap();
        }

        let fresh = collect(data.path(), synced + TimeDelta::hours(1)).await.unwrap();
        assert!(!fresh.expired);
        assert_eq!(fresh.age_minutes, Some(60));
        assert_eq!(fresh.stored_dates, 2);
        assert_eq!(fresh.first_date.as_deref(), Some("2020-04-25"));
        assert_eq!(fresh.records, 14);

        let stale = collect(data.path(), synced + TimeDelta::hours(7)).await.unwrap();
        assert!(stale.expired);
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let data = TestDataDir::new();
        let missing = data.path().join("nowhere");
        assert!(matches!(
            collect(&missing, Utc::now()).await,
            Err(CliError::InvalidArgument(_))
        ));
    }
}
