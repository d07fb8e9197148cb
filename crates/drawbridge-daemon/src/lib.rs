//! # Drawbridge Daemon
//!
//! Process lifecycle for the drawbridge daemon.
//!
//! ## Features
//!
//! - PID file per project directory (refuses a second instance, replaces stale files)
//! - Signal handling (SIGTERM/SIGINT for graceful shutdown, SIGHUP is logged)
//! - Detached start with output redirected to a log file
//! - `stop` and `status` against a recorded PID
//!
//! ## Usage
//!
//! ```rust,ignore
//! use drawbridge_daemon::DaemonRunner;
//!
//! let mut runner = DaemonRunner::new(".drawbridge/drawbridge.pid", Duration::from_secs(10));
//! let shutdown = runner.start()?;
//! runner.run_until_shutdown(serve(shutdown)).await?;
//! ```

pub mod error;
pub mod lifecycle;
pub mod pid;
pub mod signal;

pub use error::DaemonError;
pub use lifecycle::{spawn_detached, status, stop, DaemonRunner, DaemonStatus, StopOutcome};
pub use pid::{is_process_running, PidFile, PidState};
pub use signal::{send_signal_to_pid, DaemonSignal, SignalHandler};
