//! Statistic records.

use crate::date::DateKey;
use crate::error::{ModelError, ModelResult};
use crate::place::Place;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregated counters for one place on one day.
///
/// Totals are cumulative. The `new_*` fields are same-day deltas and may be
/// negative when the upstream source corrects earlier figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stats {
    /// Cumulative confirmed cases.
    pub confirmed: u64,
    /// Cumulative deaths.
    pub deaths: u64,
    /// Cumulative recoveries.
    pub recovered: u64,
    /// Currently open cases.
    pub open_cases: u64,
    /// Confirmed cases reported this day.
    #[serde(default)]
    pub new_confirmed: i64,
    /// Deaths reported this day.
    #[serde(default)]
    pub new_deaths: i64,
    /// Recoveries reported this day.
    #[serde(default)]
    pub new_recovered: i64,
    /// Change in open cases this day.
    #[serde(default)]
    pub new_open_cases: i64,
}

impl Stats {
    /// Creates stats from the four cumulative counters, with zero deltas.
    pub fn totals(confirmed: u64, deaths: u64, recovered: u64, open_cases: u64) -> Self {
        Self {
            confirmed,
            deaths,
            recovered,
            open_cases,
            ..Self::default()
        }
    }

    /// Value of the given metric.
    pub fn metric(&self, metric: Metric) -> u64 {
        match metric {
            Metric::Confirmed => self.confirmed,
            Metric::Deaths => self.deaths,
            Metric::Recovered => self.recovered,
            Metric::OpenCases => self.open_cases,
        }
    }
}

/// Immutable snapshot of one place on one day.
///
/// Records are value snapshots keyed by `(date, place)`: writing the same key
/// twice replaces the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatRecord {
    /// Day the figures belong to.
    pub date: DateKey,
    /// Place the figures belong to.
    pub place: Place,
    /// Human readable place name.
    pub name: String,
    /// The counters.
    pub stats: Stats,
}

impl StatRecord {
    /// Creates a record named after the place id.
    pub fn new(date: DateKey, place: Place, stats: Stats) -> Self {
        let name = place.id().to_string();
        Self {
            date,
            place,
            name,
            stats,
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A counter used to rank places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Cumulative confirmed cases.
    Confirmed,
    /// Cumulative deaths.
    Deaths,
    /// Cumulative recoveries.
    Recovered,
    /// Currently open cases.
    OpenCases,
}

impl Metric {
    /// Every metric, in display order.
    pub const ALL: [Metric; 4] = [
        Metric::Confirmed,
        Metric::Deaths,
        Metric::Recovered,
        Metric::OpenCases,
    ];

    /// Short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Confirmed => "confirmed",
            Metric::Deaths => "deaths",
            Metric::Recovered => "recovered",
            Metric::OpenCases => "open_cases",
        }
    }
}

impl FromStr for Metric {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "confirmed" => Ok(Metric::Confirmed),
            "deaths" => Ok(Metric::Deaths),
            "recovered" => Ok(Metric::Recovered),
            "open_cases" | "open" => Ok(Metric::OpenCases),
            _ => Err(ModelError::InvalidMetric(s.to_string())),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
