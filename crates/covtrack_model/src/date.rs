//! Calendar date keys.

use crate::error::{ModelError, ModelResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const FORMAT: &str = "%Y-%m-%d";

/// A calendar day in the fixed `YYYY-MM-DD` format.
///
/// `DateKey` is totally ordered and is the primary temporal key for every
/// per-day statistic. It serializes as its textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DateKey(NaiveDate);

impl DateKey {
    /// Creates a key from year, month and day.
    pub fn new(year: i32, month: u32, day: u32) -> ModelResult<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| ModelError::InvalidDate(format!("{year:04}-{month:02}-{day:02}")))
    }

    /// Parses the strict `YYYY-MM-DD` form.
    pub fn parse(text: &str) -> ModelResult<Self> {
        // chrono accepts unpadded fields, the key format does not
        if text.len() != 10 {
            return Err(ModelError::InvalidDate(text.to_string()));
        }
        NaiveDate::parse_from_str(text, FORMAT)
            .map(Self)
            .map_err(|_| ModelError::InvalidDate(text.to_string()))
    }

    /// Returns the underlying calendar date.
    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }

    /// Returns the following day, if representable.
    pub fn next_day(&self) -> Option<Self> {
        self.0.succ_opt().map(Self)
    }

    /// Returns the preceding day, if representable.
    pub fn previous_day(&self) -> Option<Self> {
        self.0.pred_opt().map(Self)
    }

    /// Number of days from `self` to `other` (negative when `other` is earlier).
    pub fn days_until(&self, other: &Self) -> i64 {
        other.0.signed_duration_since(self.0).num_days()
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl FromStr for DateKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DateKey {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DateKey> for String {
    fn from(key: DateKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(FORMAT))
    }
}
