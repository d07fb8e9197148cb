//! Listener setup for the live and control servers.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use drawbridge_config::Config;

use crate::error::ApiError;
use crate::http::{create_control_router, create_live_router};
use crate::state::AppState;

/// Both daemon listeners over one shared [`AppState`].
pub struct DrawbridgeServer {
    live_addr: String,
    control_addr: String,
    state: Arc<AppState>,
}

impl DrawbridgeServer {
    pub fn new(
        live_addr: impl Into<String>,
        control_addr: impl Into<String>,
        state: Arc<AppState>,
    ) -> Self {
        Self {
            live_addr: live_addr.into(),
            control_addr: control_addr.into(),
            state,
        }
    }

    pub fn from_config(config: &Config, state: Arc<AppState>) -> Self {
        Self::new(config.live_addr(), config.control_addr(), state)
    }

    pub fn live_addr(&self) -> &str {
        &self.live_addr
    }

    pub fn control_addr(&self) -> &str {
        &self.control_addr
    }

    /// Bind both listeners and serve until `shutdown` is cancelled.
    ///
    /// Fails without serving anything if either address cannot be bound.
    pub async fn start(self, shutdown: CancellationToken) -> Result<ServerHandle, ApiError> {
        let live = bind(&self.live_addr).await?;
        let control = bind(&self.control_addr).await?;
        let live_addr = local_addr(&live, &self.live_addr)?;
        let control_addr = local_addr(&control, &self.control_addr)?;

        info!(addr = %live_addr, "live channel listening");
        info!(addr = %control_addr, "queue protocol listening");

        let live_task = spawn_serve(
            "live",
            live,
            create_live_router(self.state.clone()),
            shutdown.clone(),
        );
        let control_task = spawn_serve(
            "control",
            control,
            create_control_router(self.state),
            shutdown,
        );

        Ok(ServerHandle {
            live_addr,
            control_addr,
            tasks: vec![live_task, control_task],
        })
    }
}

/// Running listeners.
pub struct ServerHandle {
    live_addr: SocketAddr,
    control_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn live_addr(&self) -> SocketAddr {
        self.live_addr
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Wait for both listeners to finish draining.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "server task panicked");
            }
        }
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ApiError> {
    TcpListener::bind(addr).await.map_err(|source| ApiError::Bind {
        addr: addr.to_string(),
        source,
    })
}

fn local_addr(listener: &TcpListener, addr: &str) -> Result<SocketAddr, ApiError> {
    listener.local_addr().map_err(|source| ApiError::Bind {
        addr: addr.to_string(),
        source,
    })
}

fn spawn_serve(
    name: &'static str,
    listener: TcpListener,
    router: axum::Router,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        match result {
            Ok(()) => info!(server = name, "listener stopped"),
            Err(e) => error!(server = name, error = %e, "listener failed"),
        }
    })
}
