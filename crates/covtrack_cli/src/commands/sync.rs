//! Sync command implementation.

use crate::error::CliResult;
use crate::mirror::DirectoryRemote;
use crate::store::{FileClockStore, FileStore};
use covtrack_model::DateKey;
use covtrack_sync::{ChannelProgress, Reconciler, SyncConfig, SyncError, SyncOutcome};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Options of the sync command.
#[derive(Debug, Clone)]
pub struct SyncArgs {
    /// Day to reconcile up to; the current UTC day when absent.
    pub today: Option<String>,
    /// Report mirror; `<path>/mirror` when absent.
    pub mirror: Option<PathBuf>,
    /// First tracked day.
    pub earliest: Option<String>,
    /// Concurrent fetch cap.
    pub concurrency: Option<usize>,
    /// Per-date fetch timeout in seconds.
    pub timeout_secs: u64,
    /// Output format (text, json).
    pub format: String,
}

/// Summary of a reconciliation run.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    /// Dates attempted.
    pub attempted: Vec<String>,
    /// Dates committed.
    pub succeeded: Vec<String>,
    /// Dates that failed.
    pub failed: Vec<FailedReport>,
    /// Records in the committed batch.
    pub records_written: usize,
    /// Whether the cache clock moved.
    pub clock_updated: bool,
    /// Run time in milliseconds.
    pub duration_ms: u128,
}

/// A failed date.
#[derive(Debug, Serialize)]
pub struct FailedReport {
    /// The date.
    pub date: String,
    /// The failure.
    pub error: String,
}

impl From<&SyncOutcome> for SyncReport {
    fn from(outcome: &SyncOutcome) -> Self {
        Self {
            attempted: outcome.attempted.iter().map(ToString::to_string).collect(),
            succeeded: outcome.succeeded.iter().map(ToString::to_string).collect(),
            failed: outcome
                .failed
                .iter()
                .map(|f| FailedReport {
                    date: f.date.to_string(),
                    error: f.error.to_string(),
                })
                .collect(),
            records_written: outcome.records_written,
            clock_updated: outcome.clock_updated,
            duration_ms: outcome.duration.as_millis(),
        }
    }
}

/// Builds the engine configuration from the command options.
pub fn config_from(args: &SyncArgs) -> CliResult<SyncConfig> {
    let mut config = SyncConfig::new().with_fetch_timeout(Duration::from_secs(args.timeout_secs));
    if let Some(earliest) = &args.earliest {
        config = config.with_earliest_date(DateKey::parse(earliest)?);
    }
    if let Some(limit) = args.concurrency {
        config = config.with_max_concurrent_fetches(limit);
    }
    config.validate()?;
    Ok(config)
}

/// Runs one reconciliation against the mirror and prints its outcome.
pub async fn run(path: &Path, args: SyncArgs) -> CliResult<SyncReport> {
    let config = config_from(&args)?;
    let today = args.today.as_deref().map(DateKey::parse).transpose()?;

    let store = Arc::new(FileStore::open(path).await.map_err(SyncError::from)?);
    let clock = Arc::new(FileClockStore::open(path));
    let mirror = args.mirror.clone().unwrap_or_else(|| path.join("mirror"));
    let remote = Arc::new(DirectoryRemote::new(mirror));

    let (progress, mut events) = ChannelProgress::new();
    let reconciler = Arc::new(
        Reconciler::new(config, remote, store, clock).with_progress(Arc::new(progress)),
    );

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!("{}", event.label());
        }
    });

    let interrupt = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling sync");
                reconciler.cancel();
            }
        })
    };

    let result = match today {
        Some(today) => reconciler.reconcile(today).await,
        None => reconciler.reconcile_now().await,
    };

    // release every handle on the progress sink so the printer drains and ends
    interrupt.abort();
    join_helper(interrupt, "interrupt watcher").await;
    drop(reconciler);
    join_helper(printer, "progress printer").await;

    let report = SyncReport::from(&result?);
    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(&report),
    }
    Ok(report)
}

/// Waits for a helper task. Returns false, after logging, when it panicked;
/// an aborted task counts as ended.
async fn join_helper(handle: JoinHandle<()>, name: &str) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(err) if err.is_cancelled() => true,
        Err(err) => {
            warn!(task = name, error = %err, "helper task did not complete");
            false
        }
    }
}

fn print_text_output(report: &SyncReport) {
    println!("covtrack sync");
    println!("=============");
    println!();
    println!("Attempted:  {} dates", report.attempted.len());
    println!("Succeeded:  {}", report.succeeded.len());
    println!("Failed:     {}", report.failed.len());
    for failed in &report.failed {
        println!("  {}  {}", failed.date, failed.error);
    }
    println!("Records:    {}", report.records_written);
    println!(
        "Clock:      {}",
        if report.clock_updated { "updated" } else { "unchanged" }
    );
    println!("Duration:   {} ms", report.duration_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use covtrack_sync::{ClockStore, LocalStore};
    use covtrack_testkit::{date, date_range, sample_report, TestDataDir};

    fn args(today: &str, earliest: &str) -> SyncArgs {
        SyncArgs {
            today: Some(today.to_string()),
            mirror: None,
            earliest: Some(earliest.to_string()),
            concurrency: Some(2),
            timeout_secs: 5,
            format: "json".to_string(),
        }
    }

    #[tokio::test]
    async fn sync_fills_the_data_directory() {
        let data = TestDataDir::new();
        for day in date_range("2020-04-24", 3) {
            data.write_report(day, &sample_report(day));
        }

        let report = run(data.path(), args("2020-04-26", "2020-04-24")).await.unwrap();

        assert_eq!(report.succeeded.len(), 3);
        assert!(report.failed.is_empty());
        assert!(report.clock_updated);

        let store = FileStore::open(data.path()).await.unwrap();
        assert_eq!(store.list_present_dates().await.unwrap().len(), 3);
        let clock = FileClockStore::open(data.path()).read().await.unwrap();
        assert!(clock.last_successful_sync.is_some());
    }

    #[tokio::test]
    async fn unpublished_today_leaves_the_clock() {
        let data = TestDataDir::new();
        let yesterday = date("2020-04-25");
        data.write_report(yesterday, &sample_report(yesterday));

        let report = run(data.path(), args("2020-04-26", "2020-04-25")).await.unwrap();

        assert_eq!(report.succeeded, vec!["2020-04-25"]);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.clock_updated);
    }

    #[tokio::test]
    async fn helper_panics_are_reported() {
        let panicked = tokio::spawn(async { panic!("printer failed") });
        assert!(!join_helper(panicked, "printer").await);

        let aborted = tokio::spawn(std::future::pending::<()>());
        aborted.abort();
        assert!(join_helper(aborted, "watcher").await);

        assert!(join_helper(tokio::spawn(async {}), "noop").await);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut bad = args("2020-04-26", "2020-04-25");
        bad.concurrency = Some(0);
        assert!(config_from(&bad).is_err());

        bad.concurrency = None;
        bad.earliest = Some("22/01/2020".into());
        assert!(config_from(&bad).is_err());
    }
}
