//! Query states and the two-element state stream.

use crate::error::{StorageError, SyncError};
use std::future::Future;
use tokio::sync::mpsc;

/// Outcome of a query as seen by a consumer.
///
/// Every stream starts with exactly one `Loading` and ends with at most one
/// terminal state (`Success`, `EmptyData` or `Error`).
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
    /// Work has started; nothing is known yet.
    Loading,
    /// The read produced data.
    Success(T),
    /// The read completed without error but found nothing.
    EmptyData,
    /// The read failed.
    Error(SyncError),
}

impl<T> QueryState<T> {
    /// Returns true for `Loading`.
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }

    /// Returns true for every state except `Loading`.
    pub fn is_terminal(&self) -> bool {
        !self.is_loading()
    }

    /// Returns the payload of a `Success`.
    pub fn success(self) -> Option<T> {
        match self {
            QueryState::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Maps the success payload.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryState<U> {
        match self {
            QueryState::Loading => QueryState::Loading,
            QueryState::Success(data) => QueryState::Success(f(data)),
            QueryState::EmptyData => QueryState::EmptyData,
            QueryState::Error(err) => QueryState::Error(err),
        }
    }
}

impl<T> QueryState<Vec<T>> {
    /// Maps a local store read to its terminal state.
    ///
    /// Both an empty result and the store's "no rows" signal become
    /// `EmptyData`; every other storage failure becomes `Error`.
    pub fn from_read(result: Result<Vec<T>, StorageError>) -> Self {
        match result {
            Ok(rows) if rows.is_empty() => QueryState::EmptyData,
            Ok(rows) => QueryState::Success(rows),
            Err(err) if err.is_empty_signal() => QueryState::EmptyData,
            Err(err) => QueryState::Error(err.into()),
        }
    }
}

/// An ordered stream of query states.
///
/// The first element, `Loading`, is queued before any I/O starts; the
/// terminal state follows once the spawned work completes. A stream whose
/// work yields no terminal state ends right after `Loading`.
#[derive(Debug)]
pub struct StateStream<T> {
    rx: mpsc::Receiver<QueryState<T>>,
}

impl<T: Send + 'static> StateStream<T> {
    /// Queues `Loading` and spawns `work` on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub(crate) fn start<F>(work: F) -> Self
    where
        F: Future<Output = Option<QueryState<T>>> + Send + 'static,
    {
        // capacity 2: neither send can wait on the consumer
        let (tx, rx) = mpsc::channel(2);
        let _ = tx.try_send(QueryState::Loading);

        tokio::spawn(async move {
            if let Some(state) = work.await {
                debug_assert!(state.is_terminal());
                let _ = tx.send(state).await;
            }
        });

        Self { rx }
    }
}

impl<T> StateStream<T> {
    /// Receives the next state, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<QueryState<T>> {
        self.rx.recv().await
    }

    /// Drains the stream.
    pub async fn collect(mut self) -> Vec<QueryState<T>> {
        let mut states = Vec::with_capacity(2);
        while let Some(state) = self.rx.recv().await {
            states.push(state);
        }
        states
    }

    /// Drains the stream and returns its terminal state, if any.
    pub async fn terminal(self) -> Option<QueryState<T>> {
        self.collect()
            .await
            .into_iter()
            .find(QueryState::is_terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_read_mapping() {
        assert_eq!(
            QueryState::from_read(Ok(vec![1, 2])),
            QueryState::Success(vec![1, 2])
        );
        assert_eq!(QueryState::<Vec<u8>>::from_read(Ok(vec![])), QueryState::EmptyData);
        assert_eq!(
            QueryState::<Vec<u8>>::from_read(Err(StorageError::Empty)),
            QueryState::EmptyData
        );
        assert_eq!(
            QueryState::<Vec<u8>>::from_read(Err(StorageError::Backend("io".into()))),
            QueryState::Error(SyncError::Storage(StorageError::Backend("io".into())))
        );
    }

    #[test]
    fn map_keeps_variant() {
        assert_eq!(QueryState::Success(2).map(|n| n * 10), QueryState::Success(20));
        assert_eq!(QueryState::<u8>::Loading.map(|n| n), QueryState::Loading);
        assert_eq!(QueryState::<u8>::EmptyData.map(|n| n), QueryState::EmptyData);
        assert!(QueryState::<u8>::Error(SyncError::Cancelled).map(|n| n).is_terminal());
    }

    #[tokio::test]
    async fn stream_yields_loading_then_terminal() {
        let stream = StateStream::start(async { Some(QueryState::Success(7u32)) });
        let states = stream.collect().await;
        assert_eq!(states, vec![QueryState::Loading, QueryState::Success(7)]);
    }

    #[tokio::test]
    async fn stream_without_terminal_ends_after_loading() {
        let stream = StateStream::<u32>::start(async { None });
        assert_eq!(stream.collect().await, vec![QueryState::Loading]);
    }

    #[tokio::test]
    async fn loading_is_available_before_work_completes() {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let mut stream = StateStream::start(async move {
            let _ = release_rx.await;
            Some(QueryState::<u32>::EmptyData)
        });

        assert_eq!(stream.next().await, Some(QueryState::Loading));
        release_tx.send(()).unwrap();
        assert_eq!(stream.next().await, Some(QueryState::EmptyData));
        assert_eq!(stream.next().await, None);
    }
}
