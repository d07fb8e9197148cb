//! Snapshot errors.

use thiserror::Error;

/// Snapshot error types.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored manifest or ledger that cannot be decoded.
    #[error("Corrupt snapshot data at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A manifest references a blob that is gone.
    #[error("Missing object: {0}")]
    MissingObject(String),

    /// Unknown snapshot id.
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// Invalid ignore pattern.
    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// Blocking task panicked or was cancelled.
    #[error("Snapshot task failed: {0}")]
    Join(String),
}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> Self {
        SnapshotError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for SnapshotError {
    fn from(e: tokio::task::JoinError) -> Self {
        SnapshotError::Join(e.to_string())
    }
}
