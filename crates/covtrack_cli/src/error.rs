//! Error types for the command-line front end.

use covtrack_model::ModelError;
use covtrack_sync::SyncError;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// A command-line argument was rejected.
    #[error("{0}")]
    InvalidArgument(String),

    /// Malformed date, place or metric.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Engine failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Output encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
