//! Daemon-related errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during daemon operations.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// PID file already exists and daemon is running.
    #[error("Daemon already running (PID file: {path}, PID: {pid})")]
    AlreadyRunning { path: PathBuf, pid: u32 },

    /// Failed to create PID file.
    #[error("Failed to create PID file at {path}: {reason}")]
    PidFileCreation { path: PathBuf, reason: String },

    /// Failed to read PID file.
    #[error("Failed to read PID file at {path}: {reason}")]
    PidFileRead { path: PathBuf, reason: String },

    /// Failed to remove PID file.
    #[error("Failed to remove PID file at {path}: {reason}")]
    PidFileRemoval { path: PathBuf, reason: String },

    /// Failed to set up signal handlers.
    #[error("Failed to set up signal handlers: {0}")]
    SignalSetup(String),

    /// Failed to deliver a signal to the daemon process.
    #[error("Failed to signal PID {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    /// Daemon is not running.
    #[error("Daemon is not running")]
    NotRunning,

    /// The daemon did not exit after being asked to stop.
    #[error("PID {pid} still running {secs}s after SIGTERM (use --force)")]
    StopTimeout { pid: u32, secs: u64 },

    /// The background process could not be started.
    #[error("Failed to spawn daemon process: {0}")]
    Spawn(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
