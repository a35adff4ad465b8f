//! Error types for the sync engine.

use covtrack_model::ModelError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for local store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failures of the remote source.
///
/// These never reach a repository consumer as an `Error` state: the
/// repository absorbs them and the reconciler lists them per date.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Remote unreachable.
    #[error("no connectivity: {0}")]
    NoConnectivity(String),

    /// Remote answered but the payload could not be mapped to records.
    #[error("remote protocol error: {0}")]
    Protocol(String),

    /// Remote answered with an error (including "no data for this date").
    #[error("remote server error: {0}")]
    Server(String),

    /// The fetch did not complete in time.
    #[error("remote fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl RemoteError {
    /// Returns true if the same request may succeed later without any
    /// change on either side.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::NoConnectivity(_) | RemoteError::Timeout(_) | RemoteError::Server(_) => {
                true
            }
            RemoteError::Protocol(_) => false,
        }
    }
}

/// Failures of the local store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store holds no rows for the query. Not a failure for consumers:
    /// it maps to `EmptyData`.
    #[error("no rows for query")]
    Empty,

    /// Backend read or write failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Stored data could not be decoded.
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Returns true for the "no rows" signal.
    pub fn is_empty_signal(&self) -> bool {
        matches!(self, StorageError::Empty)
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Remote source failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Local store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Malformed query or model input.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The run was cancelled before its batch write.
    #[error("sync cancelled")]
    Cancelled,

    /// A reconciliation run is already in flight on this reconciler.
    #[error("a reconciliation run is already in progress")]
    AlreadyRunning,

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A background task panicked or was aborted before reporting.
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_remote_errors() {
        assert!(RemoteError::NoConnectivity("offline".into()).is_transient());
        assert!(RemoteError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(RemoteError::Server("503".into()).is_transient());
        assert!(!RemoteError::Protocol("missing field".into()).is_transient());
    }

    #[test]
    fn error_display() {
        let err = SyncError::from(RemoteError::NoConnectivity("dns".into()));
        assert_eq!(err.to_string(), "no connectivity: dns");

        let err = SyncError::from(StorageError::Backend("disk full".into()));
        assert!(matches!(err, SyncError::Storage(_)));
        assert!(err.to_string().contains("disk full"));

        assert!(StorageError::Empty.is_empty_signal());
        assert!(!StorageError::Corrupt("x".into()).is_empty_signal());
    }
}
