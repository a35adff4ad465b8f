//! Property-based test generators using proptest.
//!
//! Dates stay within a few years of 2020 so that every generated value
//! round-trips through `DateKey` arithmetic.

use chrono::{Days, NaiveDate};
use covtrack_model::{DateKey, Place, StatRecord, Stats};
use proptest::prelude::*;
use std::collections::BTreeSet;

const MAX_OFFSET: u64 = 1_500;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).expect("Invalid epoch")
}

fn offset(days: u64) -> DateKey {
    DateKey::from(epoch() + Days::new(days))
}

/// Strategy for generating dates between 2020-01-01 and early 2024.
pub fn date_key_strategy() -> impl Strategy<Value = DateKey> {
    (0..MAX_OFFSET).prop_map(offset)
}

/// A calendar window and a subset of its days already stored.
#[derive(Debug, Clone)]
pub struct DateWindow {
    /// First expected day.
    pub earliest: DateKey,
    /// Last expected day.
    pub today: DateKey,
    /// Days of the window already present.
    pub present: BTreeSet<DateKey>,
}

impl DateWindow {
    /// Every day of the window, ascending.
    pub fn days(&self) -> Vec<DateKey> {
        let mut days = Vec::new();
        let mut current = Some(self.earliest);
        while let Some(day) = current.filter(|d| *d <= self.today) {
            days.push(day);
            current = day.next_day();
        }
        days
    }
}

/// Strategy for generating windows of up to `max_span + 1` days with a
/// random subset already present.
pub fn date_window_strategy(max_span: u64) -> impl Strategy<Value = DateWindow> {
    (0..MAX_OFFSET, 0..=max_span).prop_flat_map(|(start, span)| {
        prop::collection::vec(any::<bool>(), (span + 1) as usize).prop_map(move |mask| {
            let present = mask
                .iter()
                .enumerate()
                .filter(|(_, stored)| **stored)
                .map(|(i, _)| offset(start + i as u64))
                .collect();
            DateWindow {
                earliest: offset(start),
                today: offset(start + span),
                present,
            }
        })
    })
}

/// Strategy for generating consistent cumulative counters.
pub fn stats_strategy() -> impl Strategy<Value = Stats> {
    (0u64..10_000_000, 0u64..100, 0u64..100).prop_map(|(confirmed, death_pct, recovered_pct)| {
        let deaths = confirmed * death_pct.min(20) / 100;
        let recovered = confirmed * recovered_pct.min(80) / 100;
        Stats::totals(confirmed, deaths, recovered, confirmed - deaths - recovered)
    })
}

/// Strategy for generating places at every level.
pub fn place_strategy() -> impl Strategy<Value = Place> {
    // `world` is reserved for the root
    let name = || {
        prop::string::string_regex("[a-z][a-z_]{0,11}")
            .expect("Invalid regex")
            .prop_filter("reserved slug", |name| name != "world")
    };
    prop_oneof![
        Just(Place::World),
        name().prop_map(Place::country),
        (name(), name()).prop_map(|(c, r)| Place::region(c, r)),
        (name(), name(), name()).prop_map(|(c, r, s)| Place::sub_region(c, r, s)),
    ]
}

/// Strategy for generating one record.
pub fn record_strategy() -> impl Strategy<Value = StatRecord> {
    (date_key_strategy(), place_strategy(), stats_strategy())
        .prop_map(|(date, place, stats)| StatRecord::new(date, place, stats))
}
