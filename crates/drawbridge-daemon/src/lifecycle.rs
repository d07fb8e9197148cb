//! Start, stop and status of the daemon process.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::DaemonError;
use crate::pid::{is_process_running, PidFile, PidState};
use crate::signal::{send_signal_to_pid, DaemonSignal, SignalHandler};

/// Reported by `daemon status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running {
        pid: u32,
        since: Option<DateTime<Local>>,
    },
    /// A PID file is left over from a process that is gone.
    Stale { pid: u32 },
    Stopped,
}

impl DaemonStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, DaemonStatus::Running { .. })
    }
}

impl std::fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonStatus::Running { pid, since } => {
                write!(f, "running (PID {})", pid)?;
                if let Some(since) = since {
                    write!(f, " since {}", since.format("%Y-%m-%d %H:%M:%S"))?;
                }
                Ok(())
            }
            DaemonStatus::Stale { pid } => write!(f, "stale (PID {} is not running)", pid),
            DaemonStatus::Stopped => write!(f, "stopped"),
        }
    }
}

pub fn status(pid_path: &Path) -> Result<DaemonStatus, DaemonError> {
    let pid_file = PidFile::new(pid_path);
    Ok(match pid_file.state()? {
        PidState::Running(pid) => DaemonStatus::Running {
            pid,
            since: pid_file.written_at(),
        },
        PidState::Stale(pid) => DaemonStatus::Stale { pid },
        PidState::Absent => DaemonStatus::Stopped,
    })
}

/// How `stop` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process exited after the signal.
    Stopped { pid: u32 },
    /// Only a stale PID file was found, and it was removed.
    StaleRemoved { pid: u32 },
}

/// Ask the recorded daemon to exit and wait for it.
///
/// Sends SIGTERM, or SIGKILL when `force` is set. Without `force`, a daemon
/// still alive after `timeout` is an error. With `force`, the PID file is
/// removed once the process is gone since the daemon cannot clean up.
pub async fn stop(pid_path: &Path, force: bool, timeout: Duration) -> Result<StopOutcome, DaemonError> {
    let mut pid_file = PidFile::new(pid_path);
    let pid = match pid_file.state()? {
        PidState::Absent => return Err(DaemonError::NotRunning),
        PidState::Stale(pid) => {
            warn!(pid, "PID file is stale, removing");
            pid_file.remove()?;
            return Ok(StopOutcome::StaleRemoved { pid });
        }
        PidState::Running(pid) => pid,
    };

    let signal = if force {
        DaemonSignal::Terminate
    } else {
        DaemonSignal::Shutdown
    };
    send_signal_to_pid(pid, signal)?;

    if !wait_for_exit(pid, timeout).await {
        return Err(DaemonError::StopTimeout {
            pid,
            secs: timeout.as_secs(),
        });
    }

    if force || pid_file.exists() {
        pid_file.remove()?;
    }
    info!(pid, "daemon stopped");
    Ok(StopOutcome::Stopped { pid })
}

async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !is_process_running(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Start `program args..` detached from this process group, with output
/// appended to `log_path`.
pub fn spawn_detached(
    program: &Path,
    args: &[String],
    work_dir: &Path,
    log_path: &Path,
) -> Result<Child, DaemonError> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let log_err = log.try_clone()?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd
        .spawn()
        .map_err(|e| DaemonError::Spawn(format!("{}: {}", program.display(), e)))?;
    info!(pid = child.id(), log = %log_path.display(), "daemon spawned");
    Ok(child)
}

/// Runs a service future under a PID file and OS signal handlers.
pub struct DaemonRunner {
    pid_file: PidFile,
    signals: SignalHandler,
    shutdown_timeout: Duration,
}

impl DaemonRunner {
    pub fn new(pid_path: impl Into<PathBuf>, shutdown_timeout: Duration) -> Self {
        Self {
            pid_file: PidFile::new(pid_path.into()),
            signals: SignalHandler::new(),
            shutdown_timeout,
        }
    }

    pub fn signals(&self) -> &SignalHandler {
        &self.signals
    }

    /// Claim the PID file and install signal handlers. Returns the token
    /// that is cancelled on shutdown.
    pub fn start(&mut self) -> Result<CancellationToken, DaemonError> {
        self.pid_file.try_acquire()?;
        if let Err(e) = self.signals.install() {
            let _ = self.pid_file.release();
            return Err(e);
        }
        info!(pid = std::process::id(), "daemon started");
        Ok(self.signals.shutdown_token())
    }

    /// Drive `service` until it finishes or shutdown is requested, then
    /// give it `shutdown_timeout` to drain and release the PID file.
    pub async fn run_until_shutdown<F>(mut self, service: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        let shutdown = self.signals.shutdown_token();
        let mut signals = self.signals.subscribe();
        tokio::pin!(service);

        loop {
            tokio::select! {
                _ = &mut service => {
                    info!("service finished");
                    break;
                }
                _ = shutdown.cancelled() => {
                    info!("shutting down");
                    if tokio::time::timeout(self.shutdown_timeout, &mut service).await.is_err() {
                        warn!(
                            timeout_secs = self.shutdown_timeout.as_secs(),
                            "service did not drain before the shutdown timeout"
                        );
                    }
                    break;
                }
                signal = signals.recv() => {
                    if let Ok(DaemonSignal::Reload) = signal {
                        warn!("configuration is fixed at startup; restart the daemon to apply changes");
                    }
                }
            }
        }

        self.pid_file.release()?;
        info!("daemon stopped");
        Ok(())
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
