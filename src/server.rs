//! Foreground daemon: wires configuration into services and listeners.

use tracing::{error, info};

use drawbridge_api::{DrawbridgeServer, Services};
use drawbridge_config::Config;
use drawbridge_daemon::DaemonRunner;

/// Serve until SIGTERM/SIGINT, holding the PID file for the duration.
pub(crate) async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Drawbridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        work_dir = %config.work_dir().display(),
        mode = %config.mode,
        provider = %config.agent.provider,
        "configuration loaded"
    );

    let mut runner = DaemonRunner::new(config.pid_file(), config.daemon.shutdown_timeout());
    let shutdown = runner.start()?;

    let services = match Services::from_config(&config, shutdown.clone()).await {
        Ok(services) => services,
        Err(e) => {
            error!(error = %e, "failed to open daemon state");
            return Err(e.into());
        }
    };

    let worker = services.worker.map(|worker| worker.spawn(shutdown.clone()));
    let handle = DrawbridgeServer::from_config(&config, services.state)
        .start(shutdown.clone())
        .await?;

    info!(
        live = %handle.live_addr(),
        control = %handle.control_addr(),
        "Drawbridge ready"
    );

    runner
        .run_until_shutdown(async move {
            handle.wait().await;
            if let Some(worker) = worker {
                if let Err(e) = worker.await {
                    error!(error = %e, "dispatch worker panicked");
                }
            }
        })
        .await?;

    info!("Drawbridge stopped");
    Ok(())
}
