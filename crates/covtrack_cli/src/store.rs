//! JSON file persistence for records and the cache clock.
//!
//! Both files are rewritten whole through a temporary file and a rename, so
//! a batch is either fully on disk or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use covtrack_model::{DateKey, Place, Query, StatRecord};
use covtrack_sync::{CacheClock, ClockStore, LocalStore, MemoryStore, StorageError, StorageResult};
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// File holding every stored record.
pub const RECORDS_FILE: &str = "records.json";

/// File holding the cache clock.
pub const CLOCK_FILE: &str = "clock.json";

fn backend(err: std::io::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// Reads `path`, returning `None` when it does not exist.
async fn read_optional(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(backend(err)),
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(backend)?;
    tokio::fs::rename(&tmp, path).await.map_err(backend)
}

/// A record store persisted as a JSON array in `records.json`.
///
/// Reads are served from memory; every batch rewrites the file before the
/// in-memory copy changes.
pub struct FileStore {
    path: PathBuf,
    records: MemoryStore,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens the store in `dir`, creating the directory if needed.
    pub async fn open(dir: &Path) -> StorageResult<Self> {
        tokio::fs::create_dir_all(dir).await.map_err(backend)?;
        let path = dir.join(RECORDS_FILE);

        let records: Vec<StatRecord> = match read_optional(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))?,
            None => Vec::new(),
        };
        debug!(path = %path.display(), records = records.len(), "opened record store");

        Ok(Self {
            path,
            records: MemoryStore::with_records(records),
            write_lock: Mutex::new(()),
        })
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl LocalStore for FileStore {
    async fn read_by_query(&self, query: &Query) -> StorageResult<Vec<StatRecord>> {
        self.records.read_by_query(query).await
    }

    async fn write_batch(&self, batch: &[StatRecord]) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut merged: BTreeMap<(DateKey, Place), StatRecord> = self
            .records
            .records()
            .into_iter()
            .map(|r| ((r.date, r.place.clone()), r))
            .collect();
        for record in batch {
            merged.insert((record.date, record.place.clone()), record.clone());
        }

        let all: Vec<&StatRecord> = merged.values().collect();
        let bytes = serde_json::to_vec(&all).map_err(|e| StorageError::Backend(e.to_string()))?;
        write_atomically(&self.path, &bytes).await?;

        self.records.write_batch(batch).await
    }

    async fn list_present_dates(&self) -> StorageResult<BTreeSet<DateKey>> {
        self.records.list_present_dates().await
    }
}

/// The cache clock persisted in `clock.json`.
pub struct FileClockStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileClockStore {
    /// Uses `clock.json` inside `dir`.
    pub fn open(dir: &Path) -> Self {
        Self {
            path: dir.join(CLOCK_FILE),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ClockStore for FileClockStore {
    async fn read(&self) -> StorageResult<CacheClock> {
        match read_optional(&self.path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Corrupt(format!("{}: {e}", self.path.display()))),
            None => Ok(CacheClock::never()),
        }
    }

    async fn write(&self, at: DateTime<Utc>) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let clock = self.read().await?.advanced(at);
        let bytes =
            serde_json::to_vec_pretty(&clock).map_err(|e| StorageError::Backend(e.to_string()))?;
        write_atomically(&self.path, &bytes).await
    }
}
