//! Wire decoding errors.

use thiserror::Error;

/// Errors raised while decoding messages from the overlay or control clients.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload was not valid JSON for the expected shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame that is not UTF-8.
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    /// Structurally valid JSON with unusable content.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}
