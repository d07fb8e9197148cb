//! Daemon subcommand handlers for Drawbridge.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use drawbridge_config::Config;
use drawbridge_daemon::{spawn_detached, status, stop, DaemonError, DaemonStatus, StopOutcome};

use crate::cli::{DaemonAction, RunArgs};

/// How long `daemon start` waits for the child to claim its PID file.
const START_WAIT: Duration = Duration::from_secs(5);

/// Handle daemon subcommands.
pub(crate) async fn handle_daemon_command(
    action: DaemonAction,
    config: Config,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        DaemonAction::Start(args) => daemon_start(&config, config_path, &args).await,
        DaemonAction::Stop { force, timeout } => {
            daemon_stop(&config, force, Duration::from_secs(timeout)).await
        }
        DaemonAction::Status => daemon_status(&config),
    }
}

/// Re-run this binary as `drawbridge run` in the background.
async fn daemon_start(
    config: &Config,
    config_path: Option<PathBuf>,
    args: &RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let pid_path = config.pid_file();
    if let DaemonStatus::Running { pid, .. } = status(&pid_path)? {
        return Err(Box::new(DaemonError::AlreadyRunning {
            path: pid_path,
            pid,
        }));
    }

    let work_dir = config.work_dir();
    let mut child_args = Vec::new();
    if let Some(path) = config_path {
        child_args.extend(["--config".to_string(), path.display().to_string()]);
    }
    child_args.extend([
        "--work-dir".to_string(),
        work_dir.display().to_string(),
        "run".to_string(),
    ]);
    child_args.extend(args.to_args());

    let exe = std::env::current_exe()?;
    let log_path = config.log_dir().join("daemon.out");
    info!("Starting daemon...");
    let mut child = spawn_detached(&exe, &child_args, &work_dir, &log_path)?;
    let pid = child.id();

    let deadline = tokio::time::Instant::now() + START_WAIT;
    loop {
        match status(&pid_path)? {
            DaemonStatus::Running { pid: running, .. } if running == pid => {
                println!("Drawbridge daemon started (PID {})", pid);
                println!("  live:    http://{}", config.live_addr());
                println!("  control: http://{}/mcp", config.control_addr());
                println!("  output:  {}", log_path.display());
                return Ok(());
            }
            _ if child.try_wait()?.is_some() => {
                return Err(Box::new(DaemonError::Spawn(format!(
                    "daemon exited during startup, see {}",
                    log_path.display()
                ))));
            }
            _ if tokio::time::Instant::now() >= deadline => {
                warn!(pid, "daemon has not written its PID file yet");
                println!("Drawbridge daemon spawned (PID {}), still starting", pid);
                return Ok(());
            }
            _ => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
}

async fn daemon_stop(
    config: &Config,
    force: bool,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    match stop(&config.pid_file(), force, timeout).await {
        Ok(StopOutcome::Stopped { pid }) => {
            println!("Drawbridge daemon stopped (PID {})", pid);
            Ok(())
        }
        Ok(StopOutcome::StaleRemoved { pid }) => {
            println!("Daemon was not running; removed stale PID file (PID {})", pid);
            Ok(())
        }
        Err(DaemonError::NotRunning) => {
            println!("Drawbridge daemon is not running");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

fn daemon_status(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let pid_path = config.pid_file();
    let status = status(&pid_path)?;

    println!("Drawbridge Daemon Status");
    println!("========================");
    println!("PID File:  {}", pid_path.display());
    println!("Work Dir:  {}", config.work_dir().display());
    println!("Mode:      {}", config.mode);
    println!("Status:    {}", status);
    if status.is_running() {
        println!("Live:      http://{}", config.live_addr());
        println!("Control:   http://{}/mcp", config.control_addr());
    }

    Ok(())
}
