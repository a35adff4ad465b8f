//! Test fixtures and data directory helpers.
//!
//! Reports built here are deterministic: counters grow with the number of
//! days since 2020-01-22, so later days always rank above earlier ones.

use covtrack_model::{DateKey, Place, StatRecord, Stats};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Parses a `YYYY-MM-DD` literal.
///
/// # Panics
///
/// Panics on malformed input.
pub fn date(text: &str) -> DateKey {
    DateKey::parse(text).expect("Invalid date literal")
}

/// `count` consecutive days starting at `first`.
pub fn date_range(first: &str, count: usize) -> Vec<DateKey> {
    let mut dates = Vec::with_capacity(count);
    let mut current = Some(date(first));
    while let Some(day) = current {
        if dates.len() == count {
            break;
        }
        dates.push(day);
        current = day.next_day();
    }
    dates
}

/// Builds the records of one day.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    date: DateKey,
    records: Vec<StatRecord>,
}

impl ReportBuilder {
    /// Starts an empty report for `date`.
    pub fn new(date: DateKey) -> Self {
        Self {
            date,
            records: Vec::new(),
        }
    }

    /// Adds the world total.
    pub fn world(self, stats: Stats) -> Self {
        self.place(Place::World, stats)
    }

    /// Adds a country.
    pub fn country(self, country: &str, stats: Stats) -> Self {
        self.place(Place::country(country), stats)
    }

    /// Adds a region.
    pub fn region(self, country: &str, region: &str, stats: Stats) -> Self {
        self.place(Place::region(country, region), stats)
    }

    /// Adds any place.
    pub fn place(mut self, place: Place, stats: Stats) -> Self {
        self.records.push(StatRecord::new(self.date, place, stats));
        self
    }

    /// The finished report.
    pub fn build(self) -> Vec<StatRecord> {
        self.records
    }
}

fn grown(base: u64, date: DateKey) -> Stats {
    let day = date.days_until(&date_zero()).unsigned_abs() + 1;
    let confirmed = base * day;
    let deaths = confirmed / 20;
    let recovered = confirmed / 4;
    Stats::totals(confirmed, deaths, recovered, confirmed - deaths - recovered)
}

fn date_zero() -> DateKey {
    date("2020-01-22")
}

/// A realistic report: the world, three countries and three regions.
///
/// Spain ranks first on every metric, then Italy, then France.
pub fn sample_report(date: DateKey) -> Vec<StatRecord> {
    ReportBuilder::new(date)
        .world(grown(1_000, date))
        .country("spain", grown(400, date))
        .country("italy", grown(300, date))
        .country("france", grown(200, date))
        .region("spain", "madrid", grown(150, date))
        .region("spain", "catalonia", grown(120, date))
        .region("italy", "lombardia", grown(180, date))
        .build()
}

/// Sample reports for every day in `dates`, flattened.
pub fn sample_reports(dates: &[DateKey]) -> Vec<StatRecord> {
    dates.iter().flat_map(|day| sample_report(*day)).collect()
}

/// A temporary data directory with a report mirror inside it.
///
/// The directory is removed on drop.
pub struct TestDataDir {
    dir: TempDir,
}

impl TestDataDir {
    /// Creates an empty data directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(dir.path().join("mirror")).expect("Failed to create mirror directory");
        Self { dir }
    }

    /// Root of the data directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory holding the mirrored daily reports.
    pub fn mirror_path(&self) -> PathBuf {
        self.dir.path().join("mirror")
    }

    /// Writes `records` as the mirrored report for `date`.
    pub fn write_report(&self, date: DateKey, records: &[StatRecord]) -> PathBuf {
        let path = self.mirror_path().join(format!("{date}.json"));
        let json = serde_json::to_vec_pretty(records).expect("Failed to encode report");
        fs::write(&path, json).expect("Failed to write report");
        path
    }

    /// Writes raw bytes as the mirrored report for `date`.
    pub fn write_raw_report(&self, date: DateKey, contents: &str) -> PathBuf {
        let path = self.mirror_path().join(format!("{date}.json"));
        fs::write(&path, contents).expect("Failed to write report");
        path
    }
}

impl Default for TestDataDir {
    fn default() -> Self {
        Self::new()
    }
}
