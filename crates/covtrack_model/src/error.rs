//! Error types for model parsing and validation.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised when text or caller input cannot be turned into a model value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Text is not a `YYYY-MM-DD` calendar date.
    #[error("invalid date key: {0:?}")]
    InvalidDate(String),

    /// Text is not a place path.
    #[error("invalid place: {0:?}")]
    InvalidPlace(String),

    /// Unknown metric name.
    #[error("unknown metric: {0:?}")]
    InvalidMetric(String),

    /// A query that can never be answered.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
