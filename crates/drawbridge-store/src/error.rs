//! Store errors.

use drawbridge_protocols::{AnnotationState, TransitionRejected};
use thiserror::Error;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown annotation id.
    #[error("Annotation not found: {0}")]
    NotFound(String),

    /// Lifecycle violation. The record was not modified.
    #[error("Invalid transition for {id}: cannot {event} an annotation that is {from}")]
    InvalidTransition {
        id: String,
        from: AnnotationState,
        event: &'static str,
    },

    /// Client supplied id already in use.
    #[error("Annotation id already exists: {0}")]
    Duplicate(String),

    /// Client supplied id that cannot be stored.
    #[error("Invalid annotation id: {0}")]
    InvalidId(String),

    /// Persisted data that cannot be decoded. Fatal at startup.
    #[error("Corrupt annotation store at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// Backend write or read failure.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl StoreError {
    pub(crate) fn rejected(id: &str, rejected: TransitionRejected) -> Self {
        StoreError::InvalidTransition {
            id: id.to_string(),
            from: rejected.from,
            event: rejected.event,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, StoreError::InvalidTransition { .. })
    }
}
