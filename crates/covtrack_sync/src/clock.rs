//! The cache clock, its store, and injectable wall-clock time.

use crate::error::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use covtrack_model::DateKey;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Timestamp of the last fully successful synchronization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheClock {
    /// When today's figures were last downloaded; `None` if never.
    pub last_successful_sync: Option<DateTime<Utc>>,
}

impl CacheClock {
    /// A clock that has never recorded a sync.
    pub fn never() -> Self {
        Self::default()
    }

    /// A clock that last synced at `at`.
    pub fn synced_at(at: DateTime<Utc>) -> Self {
        Self {
            last_successful_sync: Some(at),
        }
    }

    /// Returns the clock moved forward to `at`. Never moves backwards.
    pub fn advanced(self, at: DateTime<Utc>) -> Self {
        match self.last_successful_sync {
            Some(last) if last >= at => self,
            _ => Self::synced_at(at),
        }
    }

    /// Time elapsed since the last sync.
    pub fn age(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.last_successful_sync.map(|last| now - last)
    }
}

/// Persistence for the cache clock.
#[async_trait]
pub trait ClockStore: Send + Sync {
    /// Reads the current clock.
    async fn read(&self) -> StorageResult<CacheClock>;

    /// Records a successful sync at `at`.
    ///
    /// Implementations keep the clock monotonic: an older timestamp than
    /// the stored one leaves the clock unchanged.
    async fn write(&self, at: DateTime<Utc>) -> StorageResult<()>;
}

/// An in-memory clock store.
#[derive(Debug, Default)]
pub struct MemoryClockStore {
    clock: RwLock<CacheClock>,
    writes: AtomicUsize,
}

impl MemoryClockStore {
    /// Creates a store that has never recorded a sync.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose last sync was at `at`.
    pub fn synced_at(at: DateTime<Utc>) -> Self {
        Self {
            clock: RwLock::new(CacheClock::synced_at(at)),
            writes: AtomicUsize::new(0),
        }
    }

    /// Current clock without going through the async trait.
    pub fn snapshot(&self) -> CacheClock {
        *self.clock.read()
    }

    /// Number of `write` calls received.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClockStore for MemoryClockStore {
    async fn read(&self) -> StorageResult<CacheClock> {
        Ok(*self.clock.read())
    }

    async fn write(&self, at: DateTime<Utc>) -> StorageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut clock = self.clock.write();
        *clock = clock.advanced(at);
        Ok(())
    }
}

/// Source of "now".
pub trait TimeSource: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar day (UTC).
    fn today(&self) -> DateKey {
        DateKey::from(self.now().date_naive())
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable time source for tests and replays.
#[derive(Debug)]
pub struct FixedTimeSource {
    now: Mutex<DateTime<Utc>>,
}

impl FixedTimeSource {
    /// Creates a source frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the frozen instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Advances the frozen instant.
    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 4, 26, hour, 0, 0).unwrap()
    }

    #[test]
    fn clock_only_moves_forward() {
        let clock = CacheClock::synced_at(at(10));
        assert_eq!(clock.advanced(at(9)), clock);
        assert_eq!(clock.advanced(at(11)), CacheClock::synced_at(at(11)));
        assert_eq!(CacheClock::never().advanced(at(1)), CacheClock::synced_at(at(1)));
    }

    #[test]
    fn clock_age() {
        assert_eq!(CacheClock::never().age(at(5)), None);
        assert_eq!(
            CacheClock::synced_at(at(2)).age(at(5)),
            Some(TimeDelta::hours(3))
        );
    }

    #[tokio::test]
    async fn memory_clock_store_is_monotonic() {
        let store = MemoryClockStore::new();
        assert_eq!(store.read().await.unwrap(), CacheClock::never());

        store.write(at(12)).await.unwrap();
        store.write(at(8)).await.unwrap();
        assert_eq!(store.snapshot(), CacheClock::synced_at(at(12)));
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn fixed_time_source() {
        let time = FixedTimeSource::new(at(23));
        assert_eq!(time.today().to_string(), "2020-04-26");
        time.advance(TimeDelta::hours(2));
        assert_eq!(time.today().to_string(), "2020-04-27");
        time.set(at(1));
        assert_eq!(time.now(), at(1));
    }
}
