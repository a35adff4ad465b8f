//! Remote source abstraction.

use crate::error::RemoteError;
use async_trait::async_trait;
use covtrack_model::{DateKey, StatRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// The upstream provider of daily statistics.
///
/// This trait abstracts the network layer and the wire format; the engine
/// only sees mapped records. One call per date, no batching.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetches every record published for `date`.
    async fn fetch_by_date(&self, date: DateKey) -> Result<Vec<StatRecord>, RemoteError>;
}

/// Fetches one day under `timeout` and checks that every record belongs to
/// that day. A record dated for another day is a protocol error.
pub(crate) async fn fetch_report<R: RemoteSource + ?Sized>(
    remote: &R,
    date: DateKey,
    timeout: Duration,
) -> Result<Vec<StatRecord>, RemoteError> {
    let records = match tokio::time::timeout(timeout, remote.fetch_by_date(date)).await {
        Ok(result) => result?,
        Err(_) => return Err(RemoteError::Timeout(timeout)),
    };

    if let Some(stray) = records.iter().find(|r| r.date != date) {
        return Err(RemoteError::Protocol(format!(
            "report for {date} contains a record for {}",
            stray.date
        )));
    }
    Ok(records)
}

/// A scripted remote source for testing.
///
/// Dates without a scripted answer fail with `RemoteError::Server`.
#[derive(Debug)]
pub struct MockRemote {
    connected: AtomicBool,
    responses: Mutex<HashMap<DateKey, Result<Vec<StatRecord>, RemoteError>>>,
    delays: Mutex<HashMap<DateKey, Duration>>,
    calls: Mutex<Vec<DateKey>>,
}

impl MockRemote {
    /// Creates a connected mock with no scripted dates.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            responses: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripts a successful answer for `date`.
    pub fn set_records(&self, date: DateKey, records: Vec<StatRecord>) {
        self.responses.lock().insert(date, Ok(records));
    }

    /// Scripts a failure for `date`.
    pub fn set_error(&self, date: DateKey, error: RemoteError) {
        self.responses.lock().insert(date, Err(error));
    }

    /// Delays every answer for `date`.
    pub fn set_delay(&self, date: DateKey, delay: Duration) {
        self.delays.lock().insert(date, delay);
    }

    /// Sets the connected state. A disconnected mock fails every call with
    /// `NoConnectivity`.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Dates requested so far, in call order.
    pub fn calls(&self) -> Vec<DateKey> {
        self.calls.lock().clone()
    }

    /// Number of calls received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSource for MockRemote {
    async fn fetch_by_date(&self, date: DateKey) -> Result<Vec<StatRecord>, RemoteError> {
        self.calls.lock().push(date);

        let delay = self.delays.lock().get(&date).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.connected.load(Ordering::SeqCst) {
            return Err(RemoteError::NoConnectivity("mock remote is offline".into()));
        }

        self.responses
            .lock()
            .get(&date)
            .cloned()
            .unwrap_or_else(|| Err(RemoteError::Server(format!("no report published for {date}"))))
    }
}
