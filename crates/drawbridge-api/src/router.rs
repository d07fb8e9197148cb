//! Mode router: hands submitted annotations to the agent or leaves them
//! for an external one.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use drawbridge_config::Mode;
use drawbridge_protocols::{Annotation, LifecycleEvent, RouteKind};
use drawbridge_store::AnnotationStore;

use crate::dispatcher::{Dispatcher, Job};
use crate::error::ApiError;
use crate::session::EventSink;

/// Routing strategy, fixed for the life of the daemon.
#[async_trait]
pub trait ModeRouter: Send + Sync {
    fn mode(&self) -> Mode;

    /// Where every annotation routed by this strategy ends up.
    fn kind(&self) -> RouteKind;

    /// Route a freshly submitted annotation. Progress for dispatched work
    /// goes to `sink`.
    async fn route(&self, annotation: Annotation, sink: EventSink) -> Result<RouteKind, ApiError>;
}

/// Auto mode: acknowledge, then queue for the dispatch worker.
pub struct AutoDispatch {
    store: Arc<AnnotationStore>,
    dispatcher: Dispatcher,
}

impl AutoDispatch {
    pub fn new(store: Arc<AnnotationStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }
}

#[async_trait]
impl ModeRouter for AutoDispatch {
    fn mode(&self) -> Mode {
        Mode::Auto
    }

    fn kind(&self) -> RouteKind {
        RouteKind::Dispatched
    }

    async fn route(&self, annotation: Annotation, sink: EventSink) -> Result<RouteKind, ApiError> {
        let annotation = self
            .store
            .transition(&annotation.id, LifecycleEvent::Acknowledge)
            .await?;
        info!(annotation_id = %annotation.id, "annotation dispatched");

        if let Err(e) = self.dispatcher.enqueue(Job { annotation: annotation.clone(), sink }) {
            // Hand it back so an external agent can still pick it up.
            let event = LifecycleEvent::Fail {
                reason: e.to_string(),
            };
            if let Err(fail_err) = self.store.transition(&annotation.id, event).await {
                warn!(
                    annotation_id = %annotation.id,
                    error = %fail_err,
                    "could not return undispatched annotation to pending"
                );
            }
            return Err(e);
        }
        Ok(RouteKind::Dispatched)
    }
}

/// Queued mode: leave the record pending for the queue protocol.
pub struct QueueOnly;

#[async_trait]
impl ModeRouter for QueueOnly {
    fn mode(&self) -> Mode {
        Mode::Queued
    }

    fn kind(&self) -> RouteKind {
        RouteKind::Queued
    }

    async fn route(&self, annotation: Annotation, _sink: EventSink) -> Result<RouteKind, ApiError> {
        info!(annotation_id = %annotation.id, "annotation queued for external agent");
        Ok(RouteKind::Queued)
    }
}
