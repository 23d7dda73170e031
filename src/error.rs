//! Error types for subset-ensemble
//!
//! Clear error messages with actionable guidance. Training and worker errors
//! are retryable by design: the growth loop logs them and moves on.

use std::time::Duration;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// subset-ensemble error types
#[derive(Error, Debug)]
pub enum Error {
    /// Caller passed an argument outside its valid domain
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Hyperparameter outside its declared domain
    #[error("Invalid hyperparameter `{name}`: {reason}")]
    InvalidHyperParameter {
        /// Hyperparameter field name
        name: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// Dataset shape or content problem (missing column, no complete rows)
    #[error("Data error: {0}")]
    Data(String),

    /// Ranking store error that is not a raw `SQLite` failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Underlying `SQLite` engine error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Arrow/Parquet error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Model fitting or prediction failed inside a worker
    #[error("Training error: {0}")]
    Training(String),

    /// Worker process exited without a usable result
    #[error("Worker failed ({status}): {stderr}\nThe round produced nothing usable and will be retried on a later pass")]
    WorkerFailed {
        /// Exit status as reported by the OS
        status: String,
        /// Captured standard error of the worker
        stderr: String,
    },

    /// Worker exceeded its bounded wait and was terminated
    #[error("Worker timed out after {0:?} and was terminated")]
    WorkerTimeout(Duration),

    /// Configuration file or value rejected
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error only invalidates the current training round.
    ///
    /// The growth loop and the exploiter skip retryable errors; everything
    /// else aborts the run.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Training(_)
                | Self::WorkerFailed { .. }
                | Self::WorkerTimeout(_)
                | Self::Data(_)
        )
    }
}

/// Turn a retryable error into `Ok(None)` after logging it at `warn`.
pub(crate) fn skip_retryable<T>(result: Result<T>, round: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_retryable() => {
            tracing::warn!(round, error = %e, "round failed; skipping");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
