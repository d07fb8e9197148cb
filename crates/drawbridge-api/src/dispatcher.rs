//! Auto-mode dispatch pipeline and revert coordination.
//!
//! One worker drains a FIFO of jobs. Each job holds the working-tree lock
//! for capture, agent run, and commit or rollback. Reverts take the same
//! lock, so a revert never touches files while an agent process is alive.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use drawbridge_agent::AgentInvoker;
use drawbridge_protocols::{
    Annotation, FailureReason, LifecycleEvent, Outcome, ProgressEvent, ProgressKind,
};
use drawbridge_snapshot::{RevertOutcome, SnapshotManager, SnapshotRef};
use drawbridge_store::AnnotationStore;

use crate::error::ApiError;
use crate::session::EventSink;

/// One annotation waiting for the agent.
#[derive(Debug)]
pub struct Job {
    pub annotation: Annotation,
    pub sink: EventSink,
}

struct Running {
    annotation_id: String,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Schedule {
    queued: HashSet<String>,
    skipped: HashSet<String>,
    running: Option<Running>,
}

/// The project tree and the lock that serializes every writer of it.
pub struct WorkTree {
    snapshots: SnapshotManager,
    lock: tokio::sync::Mutex<()>,
}

impl WorkTree {
    pub fn new(snapshots: SnapshotManager) -> Self {
        Self {
            snapshots,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }
}

/// Handle shared by the live channel, HTTP routes and the mode router.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<AnnotationStore>,
    tree: Arc<WorkTree>,
    schedule: Arc<Mutex<Schedule>>,
    jobs: Option<mpsc::UnboundedSender<Job>>,
}

/// The worker side, consumed by [`DispatchWorker::run`].
pub struct DispatchWorker {
    store: Arc<AnnotationStore>,
    tree: Arc<WorkTree>,
    schedule: Arc<Mutex<Schedule>>,
    invoker: Arc<AgentInvoker>,
    rollback_on_failure: bool,
    jobs: mpsc::UnboundedReceiver<Job>,
}

impl Dispatcher {
    /// A dispatcher with a job queue and the worker that drains it.
    pub fn with_worker(
        store: Arc<AnnotationStore>,
        tree: Arc<WorkTree>,
        invoker: Arc<AgentInvoker>,
        rollback_on_failure: bool,
    ) -> (Self, DispatchWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let schedule = Arc::new(Mutex::new(Schedule::default()));
        let dispatcher = Self {
            store: store.clone(),
            tree: tree.clone(),
            schedule: schedule.clone(),
            jobs: Some(tx),
        };
        let worker = DispatchWorker {
            store,
            tree,
            schedule,
            invoker,
            rollback_on_failure,
            jobs: rx,
        };
        (dispatcher, worker)
    }

    /// A dispatcher that only reverts. Used in queued mode.
    pub fn revert_only(store: Arc<AnnotationStore>, tree: Arc<WorkTree>) -> Self {
        Self {
            store,
            tree,
            schedule: Arc::new(Mutex::new(Schedule::default())),
            jobs: None,
        }
    }

    pub fn tree(&self) -> &Arc<WorkTree> {
        &self.tree
    }

    /// Queue a job behind everything routed before it.
    pub fn enqueue(&self, job: Job) -> Result<(), ApiError> {
        let jobs = self.jobs.as_ref().ok_or(ApiError::DispatcherClosed)?;
        let id = job.annotation.id.clone();
        self.schedule.lock().queued.insert(id.clone());
        jobs.send(job).map_err(|_| {
            self.schedule.lock().queued.remove(&id);
            ApiError::DispatcherClosed
        })?;
        debug!(annotation_id = %id, "job queued");
        Ok(())
    }

    /// Number of jobs waiting, not counting the running one.
    pub fn queued(&self) -> usize {
        let schedule = self.schedule.lock();
        schedule.queued.len().saturating_sub(schedule.skipped.len())
    }

    /// Id of the annotation the agent is working on, if any.
    pub fn running(&self) -> Option<String> {
        self.schedule
            .lock()
            .running
            .as_ref()
            .map(|r| r.annotation_id.clone())
    }

    /// Undo everything `annotation_id` changed and retire the record.
    ///
    /// A queued job for it is skipped. A running one is cancelled and the
    /// revert waits until the agent process is gone.
    pub async fn revert(&self, annotation_id: &str) -> Result<RevertOutcome, ApiError> {
        self.store.get(annotation_id).await?;

        {
            let mut schedule = self.schedule.lock();
            if schedule.queued.contains(annotation_id) {
                schedule.skipped.insert(annotation_id.to_string());
            }
            if let Some(running) = schedule
                .running
                .as_ref()
                .filter(|r| r.annotation_id == annotation_id)
            {
                info!(annotation_id, "cancelling in-flight run for revert");
                running.cancel.cancel();
            }
        }

        let outcome = {
            let _tree = self.tree.lock.lock().await;
            let outcome = self.tree.snapshots.revert(annotation_id).await?;
            // Still under the tree lock so no capture races the sweep.
            if matches!(outcome, RevertOutcome::Reverted { .. }) {
                if let Err(e) = self.tree.snapshots.gc().await {
                    warn!(annotation_id, error = %e, "snapshot garbage collection failed");
                }
            }
            outcome
        };

        match &outcome {
            RevertOutcome::Conflict { paths, annotations } => {
                warn!(annotation_id, ?paths, ?annotations, "revert blocked by later changes");
                return Ok(outcome);
            }
            RevertOutcome::Reverted { paths, records } => {
                info!(annotation_id, files = paths.len(), records, "annotation reverted");
            }
            RevertOutcome::NoChanges => debug!(annotation_id, "nothing to revert"),
        }

        let current = self.store.get(annotation_id).await?;
        if !current.state.is_terminal() {
            let event = LifecycleEvent::Dismiss {
                reason: "reverted".to_string(),
            };
            if let Err(e) = self.store.transition(annotation_id, event).await {
                warn!(annotation_id, error = %e, "failed to dismiss reverted annotation");
            }
        }
        self.store.mark_reverted(annotation_id).await?;
        Ok(outcome)
    }
}

impl DispatchWorker {
    /// Process jobs in order until shutdown or until every sender is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(provider = self.invoker.provider_name(), "dispatch worker started");
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = self.jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.process(job).await;
        }
        info!("dispatch worker stopped");
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn process(&self, job: Job) {
        let Job { annotation, sink } = job;
        let id = annotation.id.clone();
        let _tree = self.tree.lock.lock().await;

        let cancel = {
            let mut schedule = self.schedule.lock();
            schedule.queued.remove(&id);
            if schedule.skipped.remove(&id) {
                debug!(annotation_id = %id, "skipping reverted job");
                return;
            }
            let cancel = CancellationToken::new();
            schedule.running = Some(Running {
                annotation_id: id.clone(),
                cancel: cancel.clone(),
            });
            cancel
        };

        self.execute(&annotation, &sink, cancel).await;
        self.schedule.lock().running = None;
    }

    async fn execute(&self, annotation: &Annotation, sink: &EventSink, cancel: CancellationToken) {
        let id = annotation.id.as_str();
        let snapshots = &self.tree.snapshots;

        let before = match snapshots.capture().await {
            Ok(before) => before,
            Err(e) => {
                error!(annotation_id = id, error = %e, "snapshot capture failed, not running agent");
                let outcome = Outcome::Failure(FailureReason::Other(format!(
                    "could not snapshot working tree: {e}"
                )));
                sink.send(ProgressEvent::error(e.to_string()).with_annotation(id));
                sink.send(ProgressEvent::done(&outcome).with_annotation(id));
                self.fail(id, &outcome).await;
                return;
            }
        };

        let mut run = match self.invoker.process(annotation) {
            Ok(run) => run,
            Err(e) => {
                error!(annotation_id = id, error = %e, "agent could not be started");
                let outcome = Outcome::Failure(FailureReason::Other(e.to_string()));
                sink.send(ProgressEvent::done(&outcome).with_annotation(id));
                self.fail(id, &outcome).await;
                return;
            }
        };

        // `done` is held back until the run's outcome is recorded.
        let mut cancelled = false;
        let mut done = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled(), if !cancelled => {
                    run.cancel();
                    cancelled = true;
                }
                event = run.next_event() => match event {
                    Some(event) if event.kind == ProgressKind::Done => done = Some(event),
                    Some(event) => {
                        sink.send(event);
                    }
                    None => break,
                },
            }
        }
        let report = run.finish().await;
        let done = done.unwrap_or_else(|| ProgressEvent::done(&report.outcome).with_annotation(id));

        match &report.outcome {
            Outcome::Success { summary } => {
                match snapshots.commit(id, &before, report.reported_paths.clone()).await {
                    Ok(Some(record)) => info!(
                        annotation_id = id,
                        change = %record.id,
                        files = record.touched_paths.len(),
                        "change recorded"
                    ),
                    Ok(None) => info!(annotation_id = id, "agent made no file changes"),
                    Err(e) => {
                        // Edits without a change record could never be reverted.
                        error!(annotation_id = id, error = %e, "failed to record change, discarding edits");
                        self.rollback(id, &before).await;
                        let outcome = Outcome::Failure(FailureReason::Other(format!(
                            "could not record change: {e}"
                        )));
                        sink.send(ProgressEvent::error(e.to_string()).with_annotation(id));
                        self.fail(id, &outcome).await;
                        sink.send(ProgressEvent::done(&outcome).with_annotation(id));
                        return;
                    }
                }
                let event = LifecycleEvent::Resolve {
                    summary: summary.clone(),
                };
                if let Err(e) = self.store.transition(id, event).await {
                    warn!(annotation_id = id, error = %e, "could not resolve annotation");
                }
            }
            Outcome::Failure(_) => {
                if self.rollback_on_failure {
                    self.rollback(id, &before).await;
                }
                self.fail(id, &report.outcome).await;
            }
        }
        sink.send(done);
    }

    async fn rollback(&self, id: &str, before: &SnapshotRef) {
        match self.tree.snapshots.rollback(before).await {
            Ok(paths) if paths.is_empty() => {}
            Ok(paths) => info!(annotation_id = id, ?paths, "rolled back failed run"),
            Err(e) => error!(annotation_id = id, error = %e, "rollback failed"),
        }
    }

    async fn fail(&self, id: &str, outcome: &Outcome) {
        let reason = match outcome {
            Outcome::Failure(reason) => reason.to_string(),
            Outcome::Success { .. } => return,
        };
        if let Err(e) = self.store.transition(id, LifecycleEvent::Fail { reason }).await {
            warn!(annotation_id = id, error = %e, "could not record failure");
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
