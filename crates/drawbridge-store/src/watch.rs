//! Store change notifications and the pending long-poll subscription.

use std::time::Duration;

use drawbridge_protocols::{Annotation, AnnotationState};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::warn;

/// A change applied to the store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Submitted(Annotation),
    Transitioned {
        annotation: Annotation,
        from: AnnotationState,
    },
    Reverted(Annotation),
}

impl StoreEvent {
    pub fn annotation(&self) -> &Annotation {
        match self {
            StoreEvent::Submitted(a) | StoreEvent::Reverted(a) => a,
            StoreEvent::Transitioned { annotation, .. } => annotation,
        }
    }

    /// Whether this change put a record into `pending`.
    pub fn entered_pending(&self) -> bool {
        match self {
            StoreEvent::Submitted(a) => a.is_pending(),
            StoreEvent::Transitioned { annotation, from } => {
                annotation.is_pending() && *from != AnnotationState::Pending
            }
            StoreEvent::Reverted(_) => false,
        }
    }
}

/// Yields records as they enter the `pending` state.
pub struct PendingSubscription {
    rx: broadcast::Receiver<StoreEvent>,
}

impl PendingSubscription {
    pub(crate) fn new(rx: broadcast::Receiver<StoreEvent>) -> Self {
        Self { rx }
    }

    /// Wait up to `timeout` for the next record entering `pending`.
    ///
    /// Returns `None` when the ceiling passes or the store is dropped.
    pub async fn next(&mut self, timeout: Duration) -> Option<Annotation> {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => return None,
                Ok(Ok(event)) if event.entered_pending() => {
                    return Some(event.annotation().clone());
                }
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!(skipped, "Pending subscription lagged behind store events");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
            }
        }
    }
}
