//! # Drawbridge API
//!
//! Network surfaces of the drawbridge daemon and the pipeline behind them.
//!
//! - **Live channel**: WebSocket sessions for browser overlays, plus the
//!   annotation REST endpoints with Server-Sent Events progress
//! - **Queue protocol**: JSON-RPC 2.0 / MCP control endpoint for external
//!   agents
//! - **Mode router**: auto dispatch or queue-only, fixed at startup
//! - **Dispatcher**: single-flight worker that runs the agent under the
//!   working-tree lock and coordinates reverts
//!
//! ## Architecture
//!
//! ```text
//!   overlay ──ws/http──► live listener ──► ModeRouter ──► Dispatcher ──► AgentInvoker
//!                              ▲              │               │
//!                              │              ▼               ▼
//!                       progress events  AnnotationStore  SnapshotManager
//!                                             ▲
//!   external agent ──json-rpc──► control listener
//! ```

pub mod control;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod live;
pub mod router;
pub mod server;
pub mod session;
pub mod state;

pub use dispatcher::{DispatchWorker, Dispatcher, Job, WorkTree};
pub use error::ApiError;
pub use http::{create_control_router, create_live_router};
pub use router::{AutoDispatch, ModeRouter, QueueOnly};
pub use server::{DrawbridgeServer, ServerHandle};
pub use session::{EventSink, SessionRegistry, SessionSender};
pub use state::{AppState, Services};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use drawbridge_agent::{AgentInvoker, CommandProvider, InvokerOptions};
    use drawbridge_config::WatchConfig;
    use drawbridge_snapshot::{SnapshotManager, SnapshotOptions};
    use drawbridge_store::AnnotationStore;
    use tempfile::TempDir;

    use crate::dispatcher::{DispatchWorker, Dispatcher, WorkTree};
    use crate::router::{AutoDispatch, QueueOnly};
    use crate::state::AppState;

    /// Project tree and snapshot storage for one test.
    pub struct TestDirs {
        pub work: TempDir,
        pub storage: TempDir,
    }

    impl TestDirs {
        pub fn new() -> Self {
            Self {
                work: TempDir::new().unwrap(),
                storage: TempDir::new().unwrap(),
            }
        }

        pub fn tree(&self) -> Arc<WorkTree> {
            let options = SnapshotOptions::new(self.work.path(), self.storage.path());
            Arc::new(WorkTree::new(SnapshotManager::open(options).unwrap()))
        }
    }

    pub fn queued_state() -> (Arc<AppState>, TestDirs) {
        let dirs = TestDirs::new();
        let store = Arc::new(AnnotationStore::in_memory());
        let dispatcher = Dispatcher::revert_only(store.clone(), dirs.tree());
        let state = AppState::new(store, Arc::new(QueueOnly), dispatcher, WatchConfig::default());
        (Arc::new(state), dirs)
    }

    /// An agent that runs `script` with `sh -c` in the project tree.
    pub fn script_invoker(dirs: &TestDirs, script: &str) -> Arc<AgentInvoker> {
        let provider = Arc::new(CommandProvider::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
        ));
        let options = InvokerOptions::new(dirs.work.path())
            .with_timeout(Duration::from_secs(10))
            .with_grace_period(Duration::from_millis(200));
        Arc::new(AgentInvoker::new(provider, options))
    }

    pub fn auto_state(script: &str) -> (Arc<AppState>, DispatchWorker, TestDirs) {
        let dirs = TestDirs::new();
        let store = Arc::new(AnnotationStore::in_memory());
        let (dispatcher, worker) =
            Dispatcher::with_worker(store.clone(), dirs.tree(), script_invoker(&dirs, script), true);
        let router = Arc::new(AutoDispatch::new(store.clone(), dispatcher.clone()));
        let state = AppState::new(store, router, dispatcher, WatchConfig::default());
        (Arc::new(state), worker, dirs)
    }
}
