//! The offline-first sync repository.
//!
//! Every query returns a [`StateStream`]: `Loading` first, then one
//! terminal state read from the local store. Snapshot queries consult the
//! [`CacheGate`] first and refresh the requested day from the remote source
//! when the cache has expired.

use crate::clock::{CacheClock, ClockStore, SystemTimeSource, TimeSource};
use crate::config::{RefreshFailurePolicy, SyncConfig};
use crate::error::SyncError;
use crate::gate::CacheGate;
use crate::remote::{fetch_report, RemoteSource};
use crate::state::{QueryState, StateStream};
use crate::store::LocalStore;
use covtrack_model::{DateKey, Metric, Place, Query, StatRecord};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// The "most" rankings of a place's children, one per metric.
///
/// Only metrics with at least one ranked child are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingBoard {
    rankings: BTreeMap<Metric, Vec<StatRecord>>,
}

impl RankingBoard {
    /// The ranking for `metric`.
    pub fn get(&self, metric: Metric) -> Option<&[StatRecord]> {
        self.rankings.get(&metric).map(Vec::as_slice)
    }

    /// Number of rankings on the board.
    pub fn len(&self) -> usize {
        self.rankings.len()
    }

    /// True when no ranking is present.
    pub fn is_empty(&self) -> bool {
        self.rankings.is_empty()
    }

    /// Consumes the board.
    pub fn into_inner(self) -> BTreeMap<Metric, Vec<StatRecord>> {
        self.rankings
    }
}

/// Collects the per-metric ranking states of one board request.
#[derive(Debug, Default)]
struct BoardAccumulator {
    arrived: Mutex<Vec<(Metric, QueryState<Vec<StatRecord>>)>>,
}

impl BoardAccumulator {
    fn push(&self, metric: Metric, state: QueryState<Vec<StatRecord>>) {
        self.arrived.lock().push((metric, state));
    }

    /// The board's terminal state. A metric that never arrived fails the
    /// board.
    fn finish(&self) -> QueryState<RankingBoard> {
        let arrived = std::mem::take(&mut *self.arrived.lock());
        let missing: Vec<String> = Metric::ALL
            .iter()
            .filter(|metric| !arrived.iter().any(|(m, _)| m == *metric))
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            return QueryState::Error(SyncError::TaskFailed(format!(
                "ranking by {} did not complete",
                missing.join(", ")
            )));
        }

        let mut board = RankingBoard::default();
        for (metric, state) in arrived {
            match state {
                QueryState::Error(err) => return QueryState::Error(err),
                QueryState::Success(records) => {
                    board.rankings.insert(metric, records);
                }
                QueryState::EmptyData | QueryState::Loading => {}
            }
        }

        if board.is_empty() {
            QueryState::EmptyData
        } else {
            QueryState::Success(board)
        }
    }
}

/// What a snapshot refresh leaves for the rest of the pipeline.
enum Refresh {
    /// Read the local store.
    Read,
    /// End the stream after `Loading`.
    Hold,
    /// Emit this error without reading.
    Failed(SyncError),
}

/// Serves queries from the local store, refreshing stale snapshots first.
pub struct SyncRepository<R, L, K> {
    remote: Arc<R>,
    store: Arc<L>,
    clock: Arc<K>,
    time: Arc<dyn TimeSource>,
    gate: CacheGate,
    refresh_failure: RefreshFailurePolicy,
    fetch_timeout: Duration,
}

impl<R, L, K> Clone for SyncRepository<R, L, K> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            time: Arc::clone(&self.time),
            gate: self.gate,
            refresh_failure: self.refresh_failure,
            fetch_timeout: self.fetch_timeout,
        }
    }
}

impl<R, L, K> SyncRepository<R, L, K>
where
    R: RemoteSource + 'static,
    L: LocalStore + 'static,
    K: ClockStore + 'static,
{
    /// Creates a repository using the system clock.
    pub fn new(config: &SyncConfig, remote: Arc<R>, store: Arc<L>, clock: Arc<K>) -> Self {
        Self {
            remote,
            store,
            clock,
            time: Arc::new(SystemTimeSource),
            gate: CacheGate::new(config.cache_ttl),
            refresh_failure: config.refresh_failure,
            fetch_timeout: config.fetch_timeout,
        }
    }

    /// Replaces the time source used by the gate.
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Runs `query` and streams its states.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn query(&self, query: Query) -> StateStream<Vec<StatRecord>> {
        let this = self.clone();
        StateStream::start(async move { this.run_query(query).await })
    }

    /// Every record of `date`, or of the most recent day.
    pub fn snapshot(&self, date: Option<DateKey>) -> StateStream<Vec<StatRecord>> {
        self.query(Query::Snapshot { date })
    }

    /// Every record of the most recent day.
    pub fn latest(&self) -> StateStream<Vec<StatRecord>> {
        self.query(Query::latest())
    }

    /// One place on one day.
    pub fn place_on_date(
        &self,
        place: Place,
        date: Option<DateKey>,
    ) -> StateStream<Vec<StatRecord>> {
        self.query(Query::PlaceOnDate { place, date })
    }

    /// Full history of a place.
    pub fn history(&self, place: Place) -> StateStream<Vec<StatRecord>> {
        self.query(Query::History { place })
    }

    /// Children of `parent` on one day, most confirmed first.
    pub fn children_by_confirmed(
        &self,
        parent: Place,
        date: Option<DateKey>,
    ) -> StateStream<Vec<StatRecord>> {
        self.query(Query::ChildrenByConfirmed { parent, date })
    }

    /// Full histories of the children of `parent`.
    pub fn children_history_by_confirmed(&self, parent: Place) -> StateStream<Vec<StatRecord>> {
        self.query(Query::ChildrenHistoryByConfirmed { parent })
    }

    /// The `limit` children of `parent` with the highest `metric`.
    pub fn most_children(
        &self,
        parent: Place,
        metric: Metric,
        limit: usize,
    ) -> StateStream<Vec<StatRecord>> {
        self.query(Query::MostChildren {
            parent,
            metric,
            limit,
        })
    }

    /// The children of `parent`.
    pub fn children(&self, parent: Place) -> StateStream<Vec<StatRecord>> {
        self.query(Query::Children { parent })
    }

    /// Every stored date, ascending.
    pub fn all_dates(&self) -> StateStream<Vec<DateKey>> {
        let store = Arc::clone(&self.store);
        StateStream::start(async move {
            let dates = store
                .list_present_dates()
                .await
                .map(|dates| dates.into_iter().collect::<Vec<_>>());
            Some(QueryState::from_read(dates))
        })
    }

    /// The four "most" rankings of `parent`, gathered concurrently.
    ///
    /// Any failed ranking fails the board, including a ranking task that
    /// panicked; a board whose rankings are all empty is `EmptyData`.
    pub fn most_stats_board(&self, parent: Place, limit: usize) -> StateStream<RankingBoard> {
        let this = self.clone();
        StateStream::start(async move {
            let accumulator = Arc::new(BoardAccumulator::default());
            let mut join_set = JoinSet::new();

            for metric in Metric::ALL {
                let repo = this.clone();
                let accumulator = Arc::clone(&accumulator);
                let query = Query::MostChildren {
                    parent: parent.clone(),
                    metric,
                    limit,
                };
                join_set.spawn(async move {
                    if let Some(state) = repo.run_query(query).await {
                        accumulator.push(metric, state);
                    }
                });
            }

            while let Some(joined) = join_set.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "ranking task did not complete");
                }
            }

            Some(accumulator.finish())
        })
    }

    /// The pipeline behind every record query. `None` ends the stream after
    /// `Loading`.
    async fn run_query(&self, query: Query) -> Option<QueryState<Vec<StatRecord>>> {
        if let Err(err) = query.validate() {
            return Some(QueryState::Error(err.into()));
        }

        if query.is_freshness_sensitive() {
            match self.refresh(&query).await {
                Refresh::Read => {}
                Refresh::Hold => return None,
                Refresh::Failed(err) => return Some(QueryState::Error(err)),
            }
        }

        Some(QueryState::from_read(self.store.read_by_query(&query).await))
    }

    async fn refresh(&self, query: &Query) -> Refresh {
        let clock = match self.clock.read().await {
            Ok(clock) => clock,
            Err(err) => {
                warn!(error = %err, "cache clock unreadable, treating cache as expired");
                CacheClock::never()
            }
        };

        if !self.gate.is_expired(&clock, self.time.now()) {
            debug!(ttl = ?self.gate.ttl(), "cache fresh, serving local data");
            return Refresh::Read;
        }

        let Some(date) = query.refresh_date(self.time.today()) else {
            return Refresh::Read;
        };
        debug!(%date, "cache expired, refreshing");

        match fetch_report(self.remote.as_ref(), date, self.fetch_timeout).await {
            Ok(records) if records.is_empty() => {
                debug!(%date, "remote returned no records, nothing to write");
                Refresh::Read
            }
            Ok(records) => match self.store.write_batch(&records).await {
                Ok(()) => {
                    info!(%date, records = records.len(), "refreshed from remote");
                    Refresh::Read
                }
                Err(err) => {
                    warn!(%date, error = %err, "refresh write failed");
                    Refresh::Failed(err.into())
                }
            },
            Err(err) => {
                warn!(%date, error = %err, policy = ?self.refresh_failure, "refresh failed");
                match self.refresh_failure {
                    RefreshFailurePolicy::HoldLoading => Refresh::Hold,
                    RefreshFailurePolicy::ServeCache => Refresh::Read,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedTimeSource, MemoryClockStore};
    use crate::error::{RemoteError, StorageError, StorageResult};
    use crate::remote::MockRemote;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use covtrack_model::Stats;
    use std::collections::BTreeSet;

    fn key(text: &str) -> DateKey {
        DateKey::parse(text).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 4, 26, 18, 0, 0).unwrap()
    }

    // in snapshot order: level, then place
    fn day_report(date: DateKey) -> Vec<StatRecord> {
        vec![
            StatRecord::new(date, Place::World, Stats::totals(500, 30, 100, 370)),
            StatRecord::new(date, Place::country("italy"), Stats::totals(200, 10, 40, 150)),
            StatRecord::new(date, Place::country("spain"), Stats::totals(300, 20, 60, 220)),
        ]
    }

    struct Fixture {
        remote: Arc<MockRemote>,
        store: Arc<MemoryStore>,
        repo: SyncRepository<MockRemote, MemoryStore, MemoryClockStore>,
    }

    fn fixture(config: SyncConfig, clock: MemoryClockStore) -> Fixture {
        let remote = Arc::new(MockRemote::new());
        let store = Arc::new(MemoryStore::new());
        let repo = SyncRepository::new(
            &config,
            Arc::clone(&remote),
            Arc::clone(&store),
            Arc::new(clock),
        )
        .with_time_source(Arc::new(FixedTimeSource::new(now())));
        Fixture {
            remote,
            store,
            repo,
        }
    }

    fn fresh() -> Fixture {
        fixture(
            SyncConfig::new(),
            MemoryClockStore::synced_at(now() - chrono::TimeDelta::hours(1)),
        )
    }

    fn expired() -> Fixture {
        fixture(SyncConfig::new(), MemoryClockStore::new())
    }

    #[tokio::test]
    async fn fresh_cache_never_calls_remote() {
        let f = fresh();
        f.store.insert_all(day_report(key("2020-04-26")));

        let states = f.repo.latest().collect().await;

        assert_eq!(states.len(), 2);
        assert_eq!(states[0], QueryState::Loading);
        assert!(matches!(&states[1], QueryState::Success(rows) if rows.len() == 3));
        assert_eq!(f.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn expired_cache_refreshes_then_reads() {
        let f = expired();
        f.remote.set_records(key("2020-04-26"), day_report(key("2020-04-26")));

        let states = f.repo.latest().collect().await;

        assert_eq!(f.remote.calls(), vec![key("2020-04-26")]);
        assert_eq!(f.store.batch_sizes(), vec![3]);
        assert_eq!(states[0], QueryState::Loading);
        assert_eq!(states[1], QueryState::Success(day_report(key("2020-04-26"))));
    }

    #[tokio::test]
    async fn expired_cache_with_remote_failure_holds_loading() {
        let failures = [
            RemoteError::NoConnectivity("offline".into()),
            RemoteError::Server("500".into()),
            RemoteError::Protocol("unmappable payload".into()),
        ];

        for failure in failures {
            let f = expired();
            f.store.insert_all(day_report(key("2020-04-25")));
            f.remote.set_error(key("2020-04-26"), failure);

            let states = f.repo.latest().collect().await;

            assert_eq!(states, vec![QueryState::Loading]);
            assert_eq!(f.store.read_count(), 0);
            assert_eq!(f.store.write_count(), 0);
        }
    }

    #[tokio::test]
    async fn serve_cache_policy_reads_after_remote_failure() {
        let f = fixture(
            SyncConfig::new().with_refresh_failure(RefreshFailurePolicy::ServeCache),
            MemoryClockStore::new(),
        );
        f.store.insert_all(day_report(key("2020-04-25")));
        f.remote.set_connected(false);

        let states = f.repo.latest().collect().await;

        assert_eq!(states.len(), 2);
        assert_eq!(states[1], QueryState::Success(day_report(key("2020-04-25"))));
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn refresh_timeout_counts_as_remote_failure() {
        let f = fixture(
            SyncConfig::new().with_fetch_timeout(Duration::from_millis(20)),
            MemoryClockStore::new(),
        );
        f.remote.set_records(key("2020-04-26"), day_report(key("2020-04-26")));
        f.remote.set_delay(key("2020-04-26"), Duration::from_secs(5));

        assert_eq!(f.repo.latest().collect().await, vec![QueryState::Loading]);
    }

    #[tokio::test]
    async fn refresh_write_failure_is_an_error() {
        let f = expired();
        f.remote.set_records(key("2020-04-26"), day_report(key("2020-04-26")));
        f.store.set_fail_writes(true);

        let terminal = f.repo.latest().terminal().await;

        assert!(matches!(terminal, Some(QueryState::Error(SyncError::Storage(_)))));
        assert_eq!(f.store.read_count(), 0);
    }

    #[tokio::test]
    async fn storage_read_failure_is_an_error() {
        let f = fresh();
        f.store.set_fail_reads(true);

        assert_eq!(
            f.repo.history(Place::World).terminal().await,
            Some(QueryState::Error(SyncError::Storage(StorageError::Backend(
                "injected read failure".into()
            ))))
        );
    }

    #[tokio::test]
    async fn empty_store_yields_empty_data() {
        let f = fresh();
        assert_eq!(
            f.repo.children(Place::World).collect().await,
            vec![QueryState::Loading, QueryState::EmptyData]
        );
    }

    #[tokio::test]
    async fn non_snapshot_queries_ignore_the_gate() {
        let f = expired();
        f.store.insert_all(day_report(key("2020-04-26")));

        let terminal = f.repo.children_by_confirmed(Place::World, None).terminal().await;

        let names: Vec<String> = terminal
            .and_then(QueryState::success)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, ["spain", "italy"]);
        assert_eq!(f.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_query_is_an_error_state() {
        let f = fresh();
        let terminal = f
            .repo
            .children(Place::sub_region("spain", "madrid", "centro"))
            .terminal()
            .await;
        assert!(matches!(terminal, Some(QueryState::Error(SyncError::Model(_)))));
    }

    #[tokio::test]
    async fn all_dates_lists_stored_days() {
        let f = fresh();
        assert_eq!(
            f.repo.all_dates().collect().await,
            vec![QueryState::Loading, QueryState::EmptyData]
        );

        f.store.insert_all(day_report(key("2020-04-26")));
        f.store.insert_all(day_report(key("2020-04-24")));
        assert_eq!(
            f.repo.all_dates().terminal().await,
            Some(QueryState::Success(vec![key("2020-04-24"), key("2020-04-26")]))
        );
    }

    #[tokio::test]
    async fn board_collects_every_metric() {
        let f = fresh();
        f.store.insert_all(day_report(key("2020-04-26")));

        let board = f
            .repo
            .most_stats_board(Place::World, 1)
            .terminal()
            .await
            .and_then(QueryState::success)
            .unwrap();

        assert_eq!(board.len(), 4);
        for metric in Metric::ALL {
            let ranking = board.get(metric).unwrap();
            assert_eq!(ranking[0].name, "spain");
        }
    }

    #[tokio::test]
    async fn board_is_empty_or_failed_as_a_whole() {
        let f = fresh();
        assert_eq!(
            f.repo.most_stats_board(Place::World, 3).terminal().await,
            Some(QueryState::EmptyData)
        );

        f.store.insert_all(day_report(key("2020-04-26")));
        f.store.set_fail_reads(true);
        assert!(matches!(
            f.repo.most_stats_board(Place::World, 3).terminal().await,
            Some(QueryState::Error(_))
        ));
    }

    #[test]
    fn accumulator_fails_on_missing_metrics() {
        let accumulator = BoardAccumulator::default();
        accumulator.push(Metric::Confirmed, QueryState::EmptyData);
        assert!(matches!(
            accumulator.finish(),
            QueryState::Error(SyncError::TaskFailed(_))
        ));
    }

    /// Panics on the deaths ranking, reads through otherwise.
    struct PanickingStore(MemoryStore);

    #[async_trait]
    impl LocalStore for PanickingStore {
        async fn read_by_query(&self, query: &Query) -> StorageResult<Vec<StatRecord>> {
            if let Query::MostChildren {
                metric: Metric::Deaths,
                ..
            } = query
            {
                panic!("deaths ranking blew up");
            }
            self.0.read_by_query(query).await
        }

        async fn write_batch(&self, batch: &[StatRecord]) -> StorageResult<()> {
            self.0.write_batch(batch).await
        }

        async fn list_present_dates(&self) -> StorageResult<BTreeSet<DateKey>> {
            self.0.list_present_dates().await
        }
    }

    #[tokio::test]
    async fn panicked_ranking_still_ends_the_board() {
        let store = PanickingStore(MemoryStore::new());
        store.0.insert_all(day_report(key("2020-04-26")));
        let repo = SyncRepository::new(
            &SyncConfig::new(),
            Arc::new(MockRemote::new()),
            Arc::new(store),
            Arc::new(MemoryClockStore::synced_at(now())),
        )
        .with_time_source(Arc::new(FixedTimeSource::new(now())));

        let states = repo.most_stats_board(Place::World, 2).collect().await;

        assert_eq!(states.len(), 2);
        assert_eq!(states[0], QueryState::Loading);
        assert!(matches!(
            &states[1],
            QueryState::Error(SyncError::TaskFailed(msg)) if msg.contains("deaths")
        ));
    }

    #[tokio::test]
    async fn refresh_rejects_records_for_other_days() {
        let f = expired();
        f.store.insert_all(day_report(key("2020-04-25")));
        f.remote.set_records(key("2020-04-26"), day_report(key("2020-04-25")));

        let states = f.repo.latest().collect().await;

        assert_eq!(states, vec![QueryState::Loading]);
        assert_eq!(f.store.write_count(), 0);
    }
}
