//! Application state shared by both listeners.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use drawbridge_agent::{provider_from_config, AgentInvoker, InvokerOptions};
use drawbridge_config::{Config, Mode, WatchConfig};
use drawbridge_protocols::{Annotation, AnnotationDraft, AnnotationState, LifecycleEvent, RouteKind};
use drawbridge_snapshot::{SnapshotManager, SnapshotOptions};
use drawbridge_store::{AnnotationStore, FilePersistence, ListFilter};

use crate::dispatcher::{DispatchWorker, Dispatcher, WorkTree};
use crate::error::ApiError;
use crate::router::{AutoDispatch, ModeRouter, QueueOnly};
use crate::session::{EventSink, SessionRegistry};

/// State shared across handlers.
pub struct AppState {
    pub store: Arc<AnnotationStore>,
    pub router: Arc<dyn ModeRouter>,
    pub dispatcher: Dispatcher,
    pub sessions: Arc<SessionRegistry>,
    pub watch: WatchConfig,
    start_time: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<AnnotationStore>,
        router: Arc<dyn ModeRouter>,
        dispatcher: Dispatcher,
        watch: WatchConfig,
    ) -> Self {
        Self {
            store,
            router,
            dispatcher,
            sessions: Arc::new(SessionRegistry::new()),
            watch,
            start_time: Instant::now(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.router.mode()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Store a draft and route it. Progress for dispatched work goes to
    /// `sink`.
    ///
    /// Re-submitting the id of a failed, resolved or dismissed record runs
    /// it again instead of creating a new one.
    pub async fn submit(
        &self,
        draft: AnnotationDraft,
        sink: EventSink,
    ) -> Result<(Annotation, RouteKind), ApiError> {
        let annotation = self.store.resubmit(draft).await?;
        let route = self.router.route(annotation.clone(), sink).await?;
        Ok((annotation, route))
    }
}

/// Everything the daemon needs to serve, built from configuration.
pub struct Services {
    pub state: Arc<AppState>,
    /// Present in auto mode. Must be spawned for dispatched work to run.
    pub worker: Option<DispatchWorker>,
}

impl Services {
    /// Open the store and snapshot storage and wire the mode router.
    ///
    /// `shutdown` cancels any agent run still in flight.
    pub async fn from_config(config: &Config, shutdown: CancellationToken) -> Result<Self, ApiError> {
        let store = if config.store.persist {
            let persistence = FilePersistence::new(config.store_path()).await?;
            Arc::new(AnnotationStore::open(Arc::new(persistence)).await?)
        } else {
            Arc::new(AnnotationStore::in_memory())
        };
        info!(records = store.len().await, "annotation store ready");

        let snapshots = SnapshotManager::open(SnapshotOptions::from_config(config))?;
        if let Err(e) = snapshots.gc().await {
            warn!(error = %e, "snapshot garbage collection failed");
        }
        let tree = Arc::new(WorkTree::new(snapshots));

        let (router, dispatcher, worker): (Arc<dyn ModeRouter>, Dispatcher, Option<DispatchWorker>) =
            match config.mode {
                Mode::Auto => {
                    let provider = provider_from_config(&config.agent)
                        .map_err(|e| ApiError::Internal(e.to_string()))?;
                    let invoker = AgentInvoker::new(provider, InvokerOptions::from_config(config))
                        .with_shutdown(shutdown);
                    let (dispatcher, worker) = Dispatcher::with_worker(
                        store.clone(),
                        tree,
                        Arc::new(invoker),
                        config.agent.rollback_on_failure,
                    );
                    let router = Arc::new(AutoDispatch::new(store.clone(), dispatcher.clone()));
                    (router, dispatcher, Some(worker))
                }
                Mode::Queued => {
                    let dispatcher = Dispatcher::revert_only(store.clone(), tree);
                    (Arc::new(QueueOnly), dispatcher, None)
                }
            };

        if config.mode == Mode::Auto {
            recover(&store, router.as_ref()).await?;
        }

        let state = Arc::new(AppState::new(store, router, dispatcher, config.watch.clone()));
        Ok(Self { state, worker })
    }
}

/// Settle records left behind by a previous daemon.
///
/// Runs that were in flight are failed as interrupted, so they can be
/// re-submitted. Records never attempted are routed to the worker.
async fn recover(store: &AnnotationStore, router: &dyn ModeRouter) -> Result<(), ApiError> {
    let in_flight = ListFilter {
        state: Some(AnnotationState::Acknowledged),
        pathname: None,
    };
    for annotation in store.list(&in_flight).await {
        warn!(annotation_id = %annotation.id, "agent run was interrupted by a restart");
        let event = LifecycleEvent::Fail {
            reason: "interrupted".to_string(),
        };
        store.transition(&annotation.id, event).await?;
    }

    let mut requeued = 0;
    for annotation in store.list(&ListFilter::pending()).await {
        if annotation.attempts > 0 {
            continue;
        }
        router.route(annotation, EventSink::Detached).await?;
        requeued += 1;
    }
    if requeued > 0 {
        info!(requeued, "re-queued pending annotations");
    }
    Ok(())
}
