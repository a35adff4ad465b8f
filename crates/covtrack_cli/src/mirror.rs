//! A remote source backed by a directory of daily report files.

use async_trait::async_trait;
use covtrack_model::{DateKey, StatRecord};
use covtrack_sync::{RemoteError, RemoteSource};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

/// Reads `<dir>/<YYYY-MM-DD>.json`, each a JSON array of records.
///
/// A missing file means the day was not published; an unreadable directory
/// is reported as lost connectivity.
#[derive(Debug, Clone)]
pub struct DirectoryRemote {
    dir: PathBuf,
}

impl DirectoryRemote {
    /// Creates a remote over `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn report_path(&self, date: DateKey) -> PathBuf {
        self.dir.join(format!("{date}.json"))
    }
}

#[async_trait]
impl RemoteSource for DirectoryRemote {
    async fn fetch_by_date(&self, date: DateKey) -> Result<Vec<StatRecord>, RemoteError> {
        let path = self.report_path(date);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RemoteError::Server(format!("no report published for {date}")));
            }
            Err(err) => {
                return Err(RemoteError::NoConnectivity(format!("{}: {err}", path.display())));
            }
        };

        let records: Vec<StatRecord> = serde_json::from_slice(&bytes)
            .map_err(|e| RemoteError::Protocol(format!("{}: {e}", path.display())))?;
        debug!(%date, records = records.len(), "read mirrored report");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covtrack_testkit::{date, sample_report, TestDataDir};

    #[tokio::test]
    async fn reads_published_reports() {
        let data = TestDataDir::new();
        let day = date("2020-04-26");
        data.write_report(day, &sample_report(day));

        let remote = DirectoryRemote::new(data.mirror_path());
        assert_eq!(remote.fetch_by_date(day).await.unwrap(), sample_report(day));
    }

    #[tokio::test]
    async fn missing_and_malformed_reports() {
        let data = TestDataDir::new();
        let day = date("2020-04-26");
        let remote = DirectoryRemote::new(data.mirror_path());

        assert!(matches!(
            remote.fetch_by_date(day).await,
            Err(RemoteError::Server(_))
        ));

        data.write_raw_report(day, "[{\"date\": \"yesterday\"}]");
        assert!(matches!(
            remote.fetch_by_date(day).await,
            Err(RemoteError::Protocol(_))
        ));
    }
}
