//! Local store abstraction and the in-memory store.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use covtrack_model::{DateKey, Metric, Place, Query, StatRecord};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// The local cache of statistic records, keyed by `(date, place)`.
///
/// Any aggregation across places is the store's business; the engine only
/// asks for query shapes.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Reads the records answering `query`.
    ///
    /// Returns `StorageError::Empty` (or an empty vector) when nothing
    /// matches.
    async fn read_by_query(&self, query: &Query) -> StorageResult<Vec<StatRecord>>;

    /// Writes every record or none of them. A record with an existing key
    /// replaces the stored one.
    async fn write_batch(&self, records: &[StatRecord]) -> StorageResult<()>;

    /// Every date with at least one stored record.
    async fn list_present_dates(&self) -> StorageResult<BTreeSet<DateKey>>;
}

type RecordMap = BTreeMap<(DateKey, Place), StatRecord>;

/// An in-memory store with failure injection and call counters.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<RecordMap>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    batches: RwLock<Vec<usize>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `records`.
    pub fn with_records(records: impl IntoIterator<Item = StatRecord>) -> Self {
        let store = Self::new();
        store.insert_all(records);
        store
    }

    /// Inserts records without counting a batch write.
    pub fn insert_all(&self, records: impl IntoIterator<Item = StatRecord>) {
        let mut map = self.records.write();
        for record in records {
            map.insert((record.date, record.place.clone()), record);
        }
    }

    /// Every stored record, ordered by date then place.
    pub fn records(&self) -> Vec<StatRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Makes every read fail with a backend error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every write fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `read_by_query` calls.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Record counts of every committed batch, in commit order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.read().clone()
    }

    /// Number of committed batches.
    pub fn write_count(&self) -> usize {
        self.batches.read().len()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn read_by_query(&self, query: &Query) -> StorageResult<Vec<StatRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected read failure".into()));
        }

        let rows = evaluate(&self.records.read(), query);
        if rows.is_empty() {
            Err(StorageError::Empty)
        } else {
            Ok(rows)
        }
    }

    async fn write_batch(&self, records: &[StatRecord]) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected write failure".into()));
        }

        // one lock for the whole batch
        let mut map = self.records.write();
        for record in records {
            map.insert((record.date, record.place.clone()), record.clone());
        }
        self.batches.write().push(records.len());
        Ok(())
    }

    async fn list_present_dates(&self) -> StorageResult<BTreeSet<DateKey>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected read failure".into()));
        }
        Ok(self.records.read().keys().map(|(date, _)| *date).collect())
    }
}

/// Answers a query shape over a record map.
fn evaluate(map: &RecordMap, query: &Query) -> Vec<StatRecord> {
    match query {
        Query::Snapshot { date } => {
            let Some(day) = date.or_else(|| latest_date(map, |_| true)) else {
                return Vec::new();
            };
            let mut rows: Vec<StatRecord> = on_date(map, day).cloned().collect();
            rows.sort_by(|a, b| (a.place.level(), &a.place).cmp(&(b.place.level(), &b.place)));
            rows
        }
        Query::PlaceOnDate { place, date } => {
            let Some(day) = date.or_else(|| latest_date(map, |p| p == place)) else {
                return Vec::new();
            };
            map.get(&(day, place.clone())).cloned().into_iter().collect()
        }
        Query::History { place } => history(map, place),
        Query::ChildrenByConfirmed { parent, date } => {
            let Some(day) = date.or_else(|| latest_date(map, |p| p.is_child_of(parent))) else {
                return Vec::new();
            };
            let mut rows: Vec<StatRecord> = on_date(map, day)
                .filter(|r| r.place.is_child_of(parent))
                .cloned()
                .collect();
            sort_by_metric(&mut rows, Metric::Confirmed);
            rows
        }
        Query::ChildrenHistoryByConfirmed { parent } => {
            let mut latest = latest_per_child(map, parent);
            sort_by_metric(&mut latest, Metric::Confirmed);
            latest
                .iter()
                .flat_map(|r| history(map, &r.place))
                .collect()
        }
        Query::MostChildren {
            parent,
            metric,
            limit,
        } => {
            let Some(day) = latest_date(map, |p| p.is_child_of(parent)) else {
                return Vec::new();
            };
            let mut ranked: Vec<StatRecord> = on_date(map, day)
                .filter(|r| r.place.is_child_of(parent))
                .cloned()
                .collect();
            sort_by_metric(&mut ranked, *metric);
            ranked
                .iter()
                .take(*limit)
                .flat_map(|r| history(map, &r.place))
                .collect()
        }
        Query::Children { parent } => {
            let mut rows = latest_per_child(map, parent);
            rows.sort_by(|a, b| (&a.name, &a.place).cmp(&(&b.name, &b.place)));
            rows
        }
    }
}

fn latest_date(map: &RecordMap, matches: impl Fn(&Place) -> bool) -> Option<DateKey> {
    map.keys()
        .rev()
        .find(|(_, place)| matches(place))
        .map(|(date, _)| *date)
}

fn on_date(map: &RecordMap, day: DateKey) -> impl Iterator<Item = &StatRecord> {
    map.iter()
        .filter(move |((date, _), _)| *date == day)
        .map(|(_, record)| record)
}

fn history(map: &RecordMap, place: &Place) -> Vec<StatRecord> {
    map.values().filter(|r| &r.place == place).cloned().collect()
}

fn latest_per_child(map: &RecordMap, parent: &Place) -> Vec<StatRecord> {
    let mut latest: BTreeMap<&Place, &StatRecord> = BTreeMap::new();
    // ascending dates: later records overwrite earlier ones
    for record in map.values().filter(|r| r.place.is_child_of(parent)) {
        latest.insert(&record.place, record);
    }
    latest.into_values().cloned().collect()
}

fn sort_by_metric(rows: &mut [StatRecord], metric: Metric) {
    rows.sort_by(|a, b| {
        (Reverse(a.stats.metric(metric)), &a.place).cmp(&(Reverse(b.stats.metric(metric)), &b.place))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use covtrack_model::Stats;

    fn key(text: &str) -> DateKey {
        DateKey::parse(text).unwrap()
    }

    fn rec(date: &str, place: Place, confirmed: u64, deaths: u64) -> StatRecord {
        StatRecord::new(key(date), place, Stats::totals(confirmed, deaths, 0, confirmed - deaths))
    }

    fn seeded() -> MemoryStore {
        MemoryStore::with_records(vec![
            rec("2020-04-25", Place::World, 100, 10),
            rec("2020-04-25", Place::country("spain"), 40, 5),
            rec("2020-04-25", Place::country("italy"), 50, 4),
            rec("2020-04-26", Place::World, 120, 12),
            rec("2020-04-26", Place::country("spain"), 60, 6),
            rec("2020-04-26", Place::country("italy"), 55, 5),
            rec("2020-04-26", Place::region("spain", "madrid"), 30, 3),
        ])
    }

    #[tokio::test]
    async fn snapshot_of_latest_day() {
        let store = seeded();
        let rows = store.read_by_query(&Query::latest()).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.date == key("2020-04-26")));
        assert_eq!(rows[0].place, Place::World);
    }

    #[tokio::test]
    async fn place_on_date_and_history() {
        let store = seeded();
        let rows = store
            .read_by_query(&Query::PlaceOnDate {
                place: Place::country("spain"),
                date: Some(key("2020-04-25")),
            })
            .await
            .unwrap();
        assert_eq!(rows[0].stats.confirmed, 40);

        let rows = store
            .read_by_query(&Query::History {
                place: Place::country("italy"),
            })
            .await
            .unwrap();
        let dates: Vec<DateKey> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![key("2020-04-25"), key("2020-04-26")]);
    }

    #[tokio::test]
    async fn children_ranked_by_confirmed() {
        let store = seeded();
        let rows = store
            .read_by_query(&Query::ChildrenByConfirmed {
                parent: Place::World,
                date: Some(key("2020-04-25")),
            })
            .await
            .unwrap();
        let order: Vec<&str> = rows.iter().map(|r| r.place.id()).collect();
        assert_eq!(order, ["italy", "spain"]);

        // latest day flips the ranking; regions are not children of the world
        let rows = store
            .read_by_query(&Query::ChildrenByConfirmed {
                parent: Place::World,
                date: None,
            })
            .await
            .unwrap();
        let order: Vec<&str> = rows.iter().map(|r| r.place.id()).collect();
        assert_eq!(order, ["spain", "italy"]);
    }

    #[tokio::test]
    async fn most_children_keeps_histories_of_top_n() {
        let store = seeded();
        let rows = store
            .read_by_query(&Query::MostChildren {
                parent: Place::World,
                metric: Metric::Deaths,
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.place == Place::country("spain")));
    }

    #[tokio::test]
    async fn children_history_groups_by_child() {
        let store = seeded();
        let rows = store
            .read_by_query(&Query::ChildrenHistoryByConfirmed {
                parent: Place::World,
            })
            .await
            .unwrap();
        let places: Vec<&str> = rows.iter().map(|r| r.place.id()).collect();
        assert_eq!(places, ["spain", "spain", "italy", "italy"]);
    }

    #[tokio::test]
    async fn children_lists_latest_record_per_child() {
        let store = seeded();
        let rows = store
            .read_by_query(&Query::Children {
                parent: Place::country("spain"),
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].place, Place::region("spain", "madrid"));
    }

    #[tokio::test]
    async fn empty_store_signals_empty() {
        let store = MemoryStore::new();
        assert_eq!(
            store.read_by_query(&Query::latest()).await,
            Err(StorageError::Empty)
        );
        assert!(store.list_present_dates().await.unwrap().is_empty());
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn failed_batch_writes_nothing() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let batch = vec![rec("2020-04-26", Place::World, 1, 0)];
        assert!(store.write_batch(&batch).await.is_err());
        assert!(store.is_empty());
        assert_eq!(store.write_count(), 0);

        store.set_fail_writes(false);
        store.write_batch(&batch).await.unwrap();
        assert_eq!(store.batch_sizes(), vec![1]);
        assert_eq!(
            store.list_present_dates().await.unwrap(),
            BTreeSet::from([key("2020-04-26")])
        );
    }
}
