//! Signal handling for the daemon process.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DaemonError;

/// Lifecycle signal delivered to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// Graceful shutdown (SIGTERM, SIGINT).
    Shutdown,
    /// SIGHUP. Configuration is fixed at startup, so this only logs.
    Reload,
    /// Immediate stop (SIGKILL when sent to another process).
    Terminate,
}

impl std::fmt::Display for DaemonSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonSignal::Shutdown => write!(f, "SHUTDOWN"),
            DaemonSignal::Reload => write!(f, "RELOAD"),
            DaemonSignal::Terminate => write!(f, "TERMINATE"),
        }
    }
}

/// Fans OS signals out to subscribers and a shutdown token.
#[derive(Clone)]
pub struct SignalHandler {
    sender: broadcast::Sender<DaemonSignal>,
    shutdown: CancellationToken,
}

impl SignalHandler {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DaemonSignal> {
        self.sender.subscribe()
    }

    /// Cancelled once shutdown is requested. Hand child tokens to
    /// listeners and the agent invoker.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn send(&self, signal: DaemonSignal) {
        debug!("Sending signal: {}", signal);
        if matches!(signal, DaemonSignal::Shutdown | DaemonSignal::Terminate) {
            self.shutdown.cancel();
        }
        let _ = self.sender.send(signal);
    }

    pub fn request_shutdown(&self) {
        self.send(DaemonSignal::Shutdown);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Install SIGTERM, SIGINT and SIGHUP handlers.
    #[cfg(unix)]
    pub fn install(&self) -> Result<(), DaemonError> {
        use tokio::signal::unix::{signal, SignalKind};

        let kinds = [
            (SignalKind::terminate(), "SIGTERM", DaemonSignal::Shutdown),
            (SignalKind::interrupt(), "SIGINT", DaemonSignal::Shutdown),
            (SignalKind::hangup(), "SIGHUP", DaemonSignal::Reload),
        ];

        for (kind, name, mapped) in kinds {
            let mut stream = signal(kind).map_err(|e| DaemonError::SignalSetup(e.to_string()))?;
            let handler = self.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!("Received {}", name);
                    handler.send(mapped);
                }
            });
        }

        info!("OS signal handlers installed (SIGTERM, SIGINT, SIGHUP)");
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install(&self) -> Result<(), DaemonError> {
        let handler = self.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received Ctrl+C");
                handler.request_shutdown();
            }
        });

        info!("OS signal handlers installed (Ctrl+C only)");
        Ok(())
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Send a lifecycle signal to another process.
#[cfg(unix)]
pub fn send_signal_to_pid(pid: u32, signal: DaemonSignal) -> Result<(), DaemonError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let nix_signal = match signal {
        DaemonSignal::Shutdown => Signal::SIGTERM,
        DaemonSignal::Reload => Signal::SIGHUP,
        DaemonSignal::Terminate => Signal::SIGKILL,
    };
    let raw = i32::try_from(pid).map_err(|e| DaemonError::Signal {
        pid,
        reason: e.to_string(),
    })?;

    kill(Pid::from_raw(raw), nix_signal).map_err(|e| DaemonError::Signal {
        pid,
        reason: e.to_string(),
    })?;

    info!("Sent {} to PID {}", signal, pid);
    Ok(())
}

#[cfg(not(unix))]
pub fn send_signal_to_pid(pid: u32, _signal: DaemonSignal) -> Result<(), DaemonError> {
    Err(DaemonError::Signal {
        pid,
        reason: "signals are not supported on this platform".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_display() {
        assert_eq!(DaemonSignal::Shutdown.to_string(), "SHUTDOWN");
        assert_eq!(DaemonSignal::Reload.to_string(), "RELOAD");
        assert_eq!(DaemonSignal::Terminate.to_string(), "TERMINATE");
    }

    #[test]
    fn test_reload_does_not_shut_down() {
        let handler = SignalHandler::new();
        handler.send(DaemonSignal::Reload);
        assert!(!handler.is_shutdown_requested());
    }

    #[test]
    fn test_shutdown_cancels_token_for_all_clones() {
        let handler = SignalHandler::new();
        let token = handler.shutdown_token();
        let child = token.child_token();
        let cloned = handler.clone();

        handler.request_shutdown();
        assert!(cloned.is_shutdown_requested());
        assert!(token.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let handler = SignalHandler::new();
        let mut rx1 = handler.subscribe();
        let mut rx2 = handler.subscribe();

        handler.send(DaemonSignal::Reload);

        assert_eq!(rx1.recv().await.unwrap(), DaemonSignal::Reload);
        assert_eq!(rx2.recv().await.unwrap(), DaemonSignal::Reload);
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_missing_process_fails() {
        let err = send_signal_to_pid(999_999, DaemonSignal::Shutdown).unwrap_err();
        assert!(matches!(err, DaemonError::Signal { pid: 999_999, .. }));
    }
}
