//! Cache coherence gate.

use crate::clock::CacheClock;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Decides whether cached data can be trusted without a refresh.
///
/// The decision is a pure function of the clock, the TTL and the supplied
/// `now`; the gate performs no I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGate {
    ttl: Duration,
}

impl CacheGate {
    /// Creates a gate with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// The configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True when no sync was ever recorded or the last one is older than
    /// the TTL.
    pub fn is_expired(&self, clock: &CacheClock, now: DateTime<Utc>) -> bool {
        let Some(last) = clock.last_successful_sync else {
            return true;
        };
        // a TTL beyond chrono's range never expires
        match TimeDelta::from_std(self.ttl) {
            Ok(ttl) => now - last > ttl,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 4, 26, 12, 0, 0).unwrap()
    }

    #[test]
    fn never_synced_is_expired() {
        let gate = CacheGate::new(Duration::from_secs(3600));
        assert!(gate.is_expired(&CacheClock::never(), noon()));
    }

    #[test]
    fn ttl_boundary_is_exclusive() {
        let gate = CacheGate::new(Duration::from_secs(3600));
        let clock = CacheClock::synced_at(noon());

        assert!(!gate.is_expired(&clock, noon()));
        assert!(!gate.is_expired(&clock, noon() + TimeDelta::hours(1)));
        assert!(gate.is_expired(&clock, noon() + TimeDelta::hours(1) + TimeDelta::seconds(1)));
    }

    #[test]
    fn clock_ahead_of_now_is_fresh() {
        let gate = CacheGate::new(Duration::from_secs(60));
        let clock = CacheClock::synced_at(noon() + TimeDelta::hours(2));
        assert!(!gate.is_expired(&clock, noon()));
    }

    proptest! {
        #[test]
        fn decision_is_pure(last in proptest::option::of(0i64..1_000_000), now in 0i64..2_000_000, ttl in 0u64..100_000) {
            let base = noon();
            let gate = CacheGate::new(Duration::from_secs(ttl));
            let clock = CacheClock {
                last_successful_sync: last.map(|s| base + TimeDelta::seconds(s)),
            };
            let now = base + TimeDelta::seconds(now);

            let first = gate.is_expired(&clock, now);
            prop_assert_eq!(first, gate.is_expired(&clock, now));
            if clock.last_successful_sync.is_none() {
                prop_assert!(first);
            }
        }
    }
}
