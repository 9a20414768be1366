//! Common error types for scored
//!
//! This module defines all error types used across the scored daemon.
//! Per-request errors travel back to the caller as values; only
//! reconciliation I/O errors are fatal to the process.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for scored
#[derive(Error, Debug)]
pub enum ScoredError {
    /// The responding replica has no model with this name
    #[error("model {0:?} not found")]
    ModelNotFound(String),

    /// The engine returned a different number of scores than examples supplied
    #[error("engine returned {actual} scores for {expected} examples")]
    LengthMismatch { expected: usize, actual: usize },

    /// Listing or stat of the models directory failed
    #[error("reconciliation I/O error on {}: {source}", path.display())]
    ReconciliationIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Missing model name or unreadable request body
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// A model file could not be turned into an engine handle
    #[error("failed to load model {}: {reason}", path.display())]
    EngineLoad { path: PathBuf, reason: String },

    /// The engine rejected a single example
    #[error("engine error: {0}")]
    Engine(String),

    /// The worker's request loop is gone
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Metric registration or encoding errors
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ScoredError {
    fn from(err: config::ConfigError) -> Self {
        ScoredError::Config(err.to_string())
    }
}

impl ScoredError {
    /// Whether this error must terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScoredError::ReconciliationIo { .. })
    }

    /// Create a model-not-found error
    pub fn model_not_found(name: impl Into<String>) -> Self {
        ScoredError::ModelNotFound(name.into())
    }

    /// Create a reconciliation I/O error
    pub fn reconciliation_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScoredError::ReconciliationIo {
            path: path.into(),
            source,
        }
    }

    /// Create a malformed request error
    pub fn malformed(msg: impl Into<String>) -> Self {
        ScoredError::MalformedRequest(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        ScoredError::Config(msg.into())
    }

    /// Create an engine load error
    pub fn engine_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ScoredError::EngineLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an engine error
    pub fn engine(msg: impl Into<String>) -> Self {
        ScoredError::Engine(msg.into())
    }

    /// Create a worker unavailable error
    pub fn worker_unavailable(msg: impl Into<String>) -> Self {
        ScoredError::WorkerUnavailable(msg.into())
    }
}

/// Result type alias for scored operations
pub type Result<T> = std::result::Result<T, ScoredError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_only_reconciliation_io_is_fatal() {
        let fatal = ScoredError::reconciliation_io(
            "/models",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(fatal.is_fatal());

        assert!(!ScoredError::model_not_found("a").is_fatal());
        assert!(!ScoredError::malformed("no model specified").is_fatal());
        assert!(!ScoredError::LengthMismatch { expected: 3, actual: 2 }.is_fatal());
        assert!(!ScoredError::engine_load("/models/a.vw", "bad header").is_fatal());
    }

    #[test]
    fn test_error_messages_name_the_subject() {
        let err = ScoredError::model_not_found("churn");
        assert_eq!(err.to_string(), "model \"churn\" not found");

        let err = ScoredError::LengthMismatch { expected: 3, actual: 2 };
        assert_eq!(err.to_string(), "engine returned 2 scores for 3 examples");

        let err = ScoredError::reconciliation_io(
            "/srv/models",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/srv/models"));
    }
}
