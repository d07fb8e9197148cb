//! Agent errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Another run holds the working tree.
    #[error("An agent run is already in progress")]
    Busy,

    /// Provider misconfiguration.
    #[error("Agent configuration error: {0}")]
    Config(String),

    #[error("Failed to start agent: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
