//! # covtrack sync
//!
//! Offline-first synchronization of daily statistics.
//!
//! This crate provides:
//! - Query states and two-element state streams (`Loading`, then a terminal)
//! - The cache coherence gate and the persisted cache clock
//! - The sync repository, which serves queries from the local store and
//!   refreshes stale snapshots from the remote source
//! - The date reconciler, which downloads every missing day in one
//!   concurrent run and commits it as a single batch
//!
//! ## Architecture
//!
//! The local store is the source of truth for reads. The remote source only
//! ever feeds the store:
//! 1. A stale snapshot query fetches its day, writes it, then reads locally
//! 2. A reconciliation run fetches every missing day plus today, writes the
//!    successes in one batch, then moves the cache clock
//!
//! ## Key Invariants
//!
//! - Every query stream starts with exactly one `Loading`
//! - Remote failures never surface as query errors
//! - The cache clock moves only after today's figures were committed
//! - A cancelled run never commits a partial batch

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod calendar;
mod clock;
mod config;
mod error;
mod gate;
mod progress;
mod reconciler;
mod remote;
mod repository;
mod state;
mod store;

pub use calendar::{CalendarGenerator, DailyCalendar};
pub use clock::{
    CacheClock, ClockStore, FixedTimeSource, MemoryClockStore, SystemTimeSource, TimeSource,
};
pub use config::{RefreshFailurePolicy, SyncConfig};
pub use error::{RemoteError, StorageError, StorageResult, SyncError, SyncResult};
pub use gate::CacheGate;
pub use progress::{ChannelProgress, NoopProgress, ProgressEvent, ProgressSink, RecordingProgress};
pub use reconciler::{
    missing_dates, FailedDate, ReconcilePhase, ReconcileStats, Reconciler, SyncOutcome,
};
pub use remote::{MockRemote, RemoteSource};
pub use repository::{RankingBoard, SyncRepository};
pub use state::{QueryState, StateStream};
pub use store::{LocalStore, MemoryStore};
