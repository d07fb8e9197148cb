//! Annotation lifecycle state machine.
//!
//! ```text
//!            Acknowledge            Resolve
//!  pending ─────────────► acknowledged ─────► resolved
//!     │  ▲                   │     │
//!     │  └──── Fail ─────────┘     │ Dismiss
//!     │ Dismiss                    ▼
//!     └──────────────────────► dismissed
//!
//!  resolved | dismissed ── Reset ──► pending
//! ```
//!
//! Every transition not drawn above is rejected without touching the record.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationState {
    /// Received, not yet claimed by any processor.
    #[default]
    Pending,
    /// Claimed by an agent, not finished.
    Acknowledged,
    /// Agent reported completion.
    Resolved,
    /// Explicitly rejected.
    Dismissed,
}

impl AnnotationState {
    /// Whether no further progress is possible without an explicit reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnnotationState::Resolved | AnnotationState::Dismissed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationState::Pending => "pending",
            AnnotationState::Acknowledged => "acknowledged",
            AnnotationState::Resolved => "resolved",
            AnnotationState::Dismissed => "dismissed",
        }
    }
}

impl std::fmt::Display for AnnotationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event driving a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Claim a pending annotation.
    Acknowledge,
    /// Finish an acknowledged annotation with a summary.
    Resolve { summary: String },
    /// Reject a pending or acknowledged annotation.
    Dismiss { reason: String },
    /// Return an acknowledged annotation to pending after a failed run.
    Fail { reason: String },
    /// Re-open a terminal annotation for re-submission.
    Reset,
}

impl LifecycleEvent {
    /// Short event name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Acknowledge => "acknowledge",
            LifecycleEvent::Resolve { .. } => "resolve",
            LifecycleEvent::Dismiss { .. } => "dismiss",
            LifecycleEvent::Fail { .. } => "fail",
            LifecycleEvent::Reset => "reset",
        }
    }

    /// The state reached by applying this event in `from`.
    pub fn next_state(&self, from: AnnotationState) -> Result<AnnotationState, TransitionRejected> {
        use AnnotationState::*;

        let next = match (self, from) {
            (LifecycleEvent::Acknowledge, Pending) => Acknowledged,
            (LifecycleEvent::Resolve { .. }, Acknowledged) => Resolved,
            (LifecycleEvent::Dismiss { .. }, Pending | Acknowledged) => Dismissed,
            (LifecycleEvent::Fail { .. }, Acknowledged) => Pending,
            (LifecycleEvent::Reset, Resolved | Dismissed) => Pending,
            _ => {
                return Err(TransitionRejected {
                    from,
                    event: self.name(),
                })
            }
        };
        Ok(next)
    }
}

/// A transition that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {event} an annotation that is {from}")]
pub struct TransitionRejected {
    pub from: AnnotationState,
    pub event: &'static str,
}
