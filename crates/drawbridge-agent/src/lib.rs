//! # Drawbridge Agent
//!
//! Drives an external code-editing agent for one annotation at a time.
//!
//! A run is started with [`AgentInvoker::process`], which returns an
//! [`AgentRun`]: a finite stream of [`ProgressEvent`]s ending in a `done`
//! event, followed by exactly one [`RunReport`] carrying the
//! [`Outcome`]. Runs can be cancelled through their
//! [`CancellationToken`](tokio_util::sync::CancellationToken); the child
//! gets SIGTERM, then SIGKILL after the grace period.
//!
//! [`ProgressEvent`]: drawbridge_protocols::ProgressEvent
//! [`Outcome`]: drawbridge_protocols::Outcome

pub mod error;
pub mod invoker;
pub mod prompt;
pub mod provider;
pub mod stream;

pub use error::AgentError;
pub use invoker::{AgentInvoker, AgentRun, InvokerOptions, RunReport};
pub use prompt::PromptBuilder;
pub use provider::{
    provider_from_config, AgentProvider, ClaudeProvider, CodexProvider, CommandProvider,
    CommandSpec,
};
pub use stream::StreamParser;
