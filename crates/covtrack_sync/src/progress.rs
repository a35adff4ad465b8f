//! Progress reporting for reconciliation runs.

use covtrack_model::DateKey;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// A progress milestone of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Downloads finished and a multi-day update is starting.
    Started,
    /// The store is being populated with the given range.
    Populating {
        /// First attempted day.
        first: DateKey,
        /// Last attempted day.
        last: DateKey,
    },
    /// The run is over.
    Finished,
}

impl ProgressEvent {
    /// Human readable label.
    pub fn label(&self) -> String {
        match self {
            ProgressEvent::Started => "Downloading data".to_string(),
            ProgressEvent::Populating { first, last } => {
                format!("Populating database from {first} to {last}")
            }
            ProgressEvent::Finished => "Update finished".to_string(),
        }
    }

    /// Date range carried by the event.
    pub fn range(&self) -> Option<(DateKey, DateKey)> {
        match self {
            ProgressEvent::Populating { first, last } => Some((*first, *last)),
            _ => None,
        }
    }
}

/// Receives progress events.
///
/// `report` is fire-and-forget: it must not block and cannot fail the run.
pub trait ProgressSink: Send + Sync {
    /// Reports one event.
    fn report(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards events into an unbounded channel.
///
/// Once the receiver is dropped, reports are silently discarded.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    /// Creates a sink and the receiver it feeds.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("progress receiver gone, event dropped");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}
