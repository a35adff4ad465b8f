//! Date reconciler: fills the gaps between the calendar and the store.

use crate::calendar::{CalendarGenerator, DailyCalendar};
use crate::clock::{ClockStore, SystemTimeSource, TimeSource};
use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::progress::{NoopProgress, ProgressEvent, ProgressSink};
use crate::remote::{fetch_report, RemoteSource};
use crate::store::LocalStore;
use covtrack_model::{DateKey, StatRecord};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// The phase a reconciler is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    /// No run in flight.
    Idle,
    /// Comparing the calendar with the stored dates.
    Planning,
    /// Waiting on remote fetches.
    Fetching,
    /// Writing the batch.
    Committing,
    /// Last run completed.
    Done,
    /// Last run ended with an error or was cancelled.
    Failed,
}

impl ReconcilePhase {
    /// Returns true while a run is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ReconcilePhase::Planning | ReconcilePhase::Fetching | ReconcilePhase::Committing
        )
    }
}

/// A date whose fetch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDate {
    /// The date.
    pub date: DateKey,
    /// Why it failed.
    pub error: RemoteError,
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Dates fetched, ascending, today last.
    pub attempted: Vec<DateKey>,
    /// Dates whose records were fetched and committed.
    pub succeeded: Vec<DateKey>,
    /// Dates that failed, with their causes.
    pub failed: Vec<FailedDate>,
    /// Records in the committed batch.
    pub records_written: usize,
    /// Whether the cache clock was moved.
    pub clock_updated: bool,
    /// Wall time of the run.
    pub duration: Duration,
}

impl SyncOutcome {
    fn nothing_to_do(duration: Duration) -> Self {
        Self {
            attempted: Vec::new(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            records_written: 0,
            clock_updated: false,
            duration,
        }
    }

    /// Returns true when every attempted date succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Dates that failed.
    pub fn failed_dates(&self) -> Vec<DateKey> {
        self.failed.iter().map(|f| f.date).collect()
    }
}

/// Counters across runs.
#[derive(Debug, Clone, Default)]
pub struct ReconcileStats {
    /// Runs that returned an outcome.
    pub runs_completed: u64,
    /// Runs cancelled before their batch write.
    pub runs_cancelled: u64,
    /// Dates fetched successfully.
    pub dates_fetched: u64,
    /// Dates whose fetch failed.
    pub dates_failed: u64,
    /// Records committed.
    pub records_written: u64,
    /// Start of the last run.
    pub last_run: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Dates that are expected but not stored, plus `today`, ascending.
///
/// Today is always included: same-day figures are provisional and get
/// revised upstream. Dates after `today` are ignored.
pub fn missing_dates(
    expected: &[DateKey],
    present: &BTreeSet<DateKey>,
    today: DateKey,
) -> Vec<DateKey> {
    let mut missing: BTreeSet<DateKey> = expected
        .iter()
        .filter(|date| **date <= today && !present.contains(*date))
        .copied()
        .collect();
    missing.insert(today);
    missing.into_iter().collect()
}

#[derive(Debug, Default)]
struct FetchedDates {
    succeeded: Vec<DateKey>,
    records: Vec<StatRecord>,
    failed: Vec<FailedDate>,
}

/// Clears the running flag when a run ends, including when its future is
/// dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Downloads every day missing from the local store.
///
/// A run fetches all missing days concurrently, keeps whatever succeeded,
/// commits it in a single batch and moves the cache clock only when today's
/// figures were among the successes.
pub struct Reconciler<R, L, K> {
    config: SyncConfig,
    remote: Arc<R>,
    store: Arc<L>,
    clock: Arc<K>,
    calendar: Arc<dyn CalendarGenerator>,
    progress: Arc<dyn ProgressSink>,
    time: Arc<dyn TimeSource>,
    phase: RwLock<ReconcilePhase>,
    stats: RwLock<ReconcileStats>,
    cancel: watch::Sender<bool>,
    running: AtomicBool,
}

impl<R, L, K> Reconciler<R, L, K>
where
    R: RemoteSource + 'static,
    L: LocalStore,
    K: ClockStore,
{
    /// Creates a reconciler with a daily calendar, no progress sink and the
    /// system clock.
    pub fn new(config: SyncConfig, remote: Arc<R>, store: Arc<L>, clock: Arc<K>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            config,
            remote,
            store,
            clock,
            calendar: Arc::new(DailyCalendar),
            progress: Arc::new(NoopProgress),
            time: Arc::new(SystemTimeSource),
            phase: RwLock::new(ReconcilePhase::Idle),
            stats: RwLock::new(ReconcileStats::default()),
            cancel,
            running: AtomicBool::new(false),
        }
    }

    /// Replaces the calendar generator.
    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarGenerator>) -> Self {
        self.calendar = calendar;
        self
    }

    /// Replaces the progress sink.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Replaces the time source used for the clock write.
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> ReconcilePhase {
        *self.phase.read()
    }

    /// Counters across runs.
    pub fn stats(&self) -> ReconcileStats {
        self.stats.read().clone()
    }

    /// Cancels the run in flight.
    ///
    /// A run observes cancellation up to its batch write; after that it
    /// completes. Each new run clears the flag when it starts.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    fn reset_cancel(&self) {
        self.cancel.send_replace(false);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if *self.cancel.borrow() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: ReconcilePhase) {
        *self.phase.write() = phase;
    }

    /// Runs reconciliation for the time source's current day.
    pub async fn reconcile_now(&self) -> SyncResult<SyncOutcome> {
        let today = self.time.today();
        self.reconcile(today).await
    }

    /// Runs one reconciliation up to and including `today`.
    ///
    /// Remote failures are reported per date in the outcome. Storage
    /// failures, cancellation and an overlapping run are errors; none of
    /// them moves the clock.
    pub async fn reconcile(&self, today: DateKey) -> SyncResult<SyncOutcome> {
        self.config.validate()?;
        let _guard = RunGuard::acquire(&self.running).ok_or(SyncError::AlreadyRunning)?;

        let start = Instant::now();
        self.reset_cancel();
        self.stats.write().last_run = Some(start);

        let result = self.run(today, start).await;

        match &result {
            Ok(outcome) => {
                self.set_phase(ReconcilePhase::Done);
                let mut stats = self.stats.write();
                stats.runs_completed += 1;
                stats.dates_fetched += outcome.succeeded.len() as u64;
                stats.dates_failed += outcome.failed.len() as u64;
                stats.records_written += outcome.records_written as u64;
                stats.last_error = None;
            }
            Err(err) => {
                self.set_phase(ReconcilePhase::Failed);
                let mut stats = self.stats.write();
                if matches!(err, SyncError::Cancelled) {
                    stats.runs_cancelled += 1;
                }
                stats.last_error = Some(err.to_string());
            }
        }

        result
    }

    async fn run(&self, today: DateKey, start: Instant) -> SyncResult<SyncOutcome> {
        self.set_phase(ReconcilePhase::Planning);

        let expected = self
            .calendar
            .all_dates_from(self.config.earliest_date, today);
        let present = self.store.list_present_dates().await?;
        let missing = missing_dates(&expected, &present, today);

        info!(
            %today,
            expected = expected.len(),
            present = present.len(),
            missing = missing.len(),
            "planned reconciliation"
        );

        let (Some(&first), Some(&last)) = (missing.first(), missing.last()) else {
            return Ok(SyncOutcome::nothing_to_do(start.elapsed()));
        };

        self.check_cancelled()?;
        self.set_phase(ReconcilePhase::Fetching);
        let mut cancel_rx = self.cancel.subscribe();
        let fetched = self.fetch_all(&missing, &mut cancel_rx).await?;

        if missing.len() > 1 {
            self.check_cancelled()?;
            self.progress.report(ProgressEvent::Started);

            tokio::select! {
                _ = tokio::time::sleep(self.config.settle_delay) => {}
                _ = cancelled(&mut cancel_rx) => {
                    info!("reconciliation cancelled while settling");
                    return Err(SyncError::Cancelled);
                }
            }

            self.check_cancelled()?;
            self.progress.report(ProgressEvent::Populating { first, last });
        }

        // last point where cancellation is honored
        self.check_cancelled()?;
        self.set_phase(ReconcilePhase::Committing);

        let FetchedDates {
            succeeded,
            records,
            failed,
        } = fetched;

        if !records.is_empty() {
            if let Err(err) = self.store.write_batch(&records).await {
                warn!(error = %err, dates = succeeded.len(), "batch write failed, run not persisted");
                self.progress.report(ProgressEvent::Finished);
                return Err(err.into());
            }
            debug!(records = records.len(), dates = succeeded.len(), "batch committed");
        }

        self.progress.report(ProgressEvent::Finished);

        let mut clock_updated = false;
        if succeeded.contains(&today) {
            match self.clock.write(self.time.now()).await {
                Ok(()) => clock_updated = true,
                Err(err) => warn!(error = %err, "cache clock write failed"),
            }
        } else {
            debug!(%today, "today not downloaded, cache clock untouched");
        }

        info!(
            attempted = missing.len(),
            succeeded = succeeded.len(),
            failed = failed.len(),
            clock_updated,
            "reconciliation finished"
        );

        Ok(SyncOutcome {
            attempted: missing,
            succeeded,
            records_written: records.len(),
            failed,
            clock_updated,
            duration: start.elapsed(),
        })
    }

    /// Fetches every date concurrently and waits for all of them.
    async fn fetch_all(
        &self,
        missing: &[DateKey],
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> SyncResult<FetchedDates> {
        let limiter = self
            .config
            .max_concurrent_fetches
            .map(|limit| Arc::new(Semaphore::new(limit)));
        let timeout = self.config.fetch_timeout;

        let mut join_set = JoinSet::new();
        for (index, date) in missing.iter().copied().enumerate() {
            let remote = Arc::clone(&self.remote);
            let limiter = limiter.clone();
            join_set.spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                (index, fetch_one(remote.as_ref(), date, timeout).await)
            });
        }

        // one slot per date, filled as fetches complete in any order
        let mut slots: Vec<Option<Result<Vec<StatRecord>, RemoteError>>> = vec![None; missing.len()];
        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Ok((index, result))) => slots[index] = Some(result),
                    Some(Err(err)) => warn!(error = %err, "fetch task did not complete"),
                    None => break,
                },
                _ = cancelled(cancel_rx) => {
                    join_set.abort_all();
                    info!("reconciliation cancelled during fetch");
                    return Err(SyncError::Cancelled);
                }
            }
        }

        let mut fetched = FetchedDates::default();
        for (date, slot) in missing.iter().copied().zip(slots) {
            match slot {
                Some(Ok(records)) => {
                    fetched.succeeded.push(date);
                    fetched.records.extend(records);
                }
                Some(Err(error)) => {
                    warn!(%date, %error, transient = error.is_transient(), "fetch failed");
                    fetched.failed.push(FailedDate { date, error });
                }
                None => fetched.failed.push(FailedDate {
                    date,
                    error: RemoteError::Server("fetch task aborted".into()),
                }),
            }
        }
        Ok(fetched)
    }
}

/// Resolves once cancellation is requested.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // sender gone: cancellation can no longer happen
        std::future::pending::<()>().await;
    }
}

/// One fetch under its own timeout. A report with no records, or with
/// records for another day, is a protocol error.
async fn fetch_one<R: RemoteSource + ?Sized>(
    remote: &R,
    date: DateKey,
    timeout: Duration,
) -> Result<Vec<StatRecord>, RemoteError> {
    let records = fetch_report(remote, date, timeout).await?;
    if records.is_empty() {
        return Err(RemoteError::Protocol(format!("empty report for {date}")));
    }
    Ok(records)
}
