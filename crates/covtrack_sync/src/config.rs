//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use chrono::NaiveDate;
use covtrack_model::DateKey;
use std::time::Duration;

/// What the repository emits when a freshness refresh fails remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailurePolicy {
    /// End the stream after `Loading` without reading local storage.
    HoldLoading,
    /// Read local storage anyway and emit its terminal state.
    ServeCache,
}

/// Configuration for the repository and the reconciler.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long a successful sync keeps the cache fresh.
    pub cache_ttl: Duration,
    /// First day the calendar generator produces.
    pub earliest_date: DateKey,
    /// Independent timeout for every remote fetch.
    pub fetch_timeout: Duration,
    /// Upper bound on concurrent reconciler fetches; `None` is unbounded.
    pub max_concurrent_fetches: Option<usize>,
    /// Pause between the "start" and "populating" progress events.
    pub settle_delay: Duration,
    /// Repository behavior when a refresh fetch fails.
    pub refresh_failure: RefreshFailurePolicy,
}

impl SyncConfig {
    /// Creates a configuration with the default policy values.
    pub fn new() -> Self {
        Self {
            cache_ttl: Duration::from_secs(6 * 60 * 60),
            earliest_date: default_earliest_date(),
            fetch_timeout: Duration::from_secs(30),
            max_concurrent_fetches: None,
            settle_delay: Duration::from_millis(500),
            refresh_failure: RefreshFailurePolicy::HoldLoading,
        }
    }

    /// Sets the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the first tracked day.
    pub fn with_earliest_date(mut self, date: DateKey) -> Self {
        self.earliest_date = date;
        self
    }

    /// Sets the per-fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Caps reconciler fan-out.
    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = Some(limit);
        self
    }

    /// Removes the fan-out cap.
    pub fn unbounded_fetches(mut self) -> Self {
        self.max_concurrent_fetches = None;
        self
    }

    /// Sets the settling delay between progress events.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the refresh failure policy.
    pub fn with_refresh_failure(mut self, policy: RefreshFailurePolicy) -> Self {
        self.refresh_failure = policy;
        self
    }

    /// Checks values that would make a reconciliation run meaningless.
    pub fn validate(&self) -> SyncResult<()> {
        if self.cache_ttl.is_zero() {
            return Err(SyncError::InvalidConfig("cache TTL must be non-zero".into()));
        }
        if self.fetch_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("fetch timeout must be non-zero".into()));
        }
        if self.max_concurrent_fetches == Some(0) {
            return Err(SyncError::InvalidConfig(
                "max concurrent fetches must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// First day with upstream figures.
fn default_earliest_date() -> DateKey {
    NaiveDate::from_ymd_opt(2020, 1, 22)
        .map(DateKey::from)
        .unwrap_or_else(|| DateKey::from(NaiveDate::MIN))
}
