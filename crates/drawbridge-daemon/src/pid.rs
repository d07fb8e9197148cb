//! PID file management.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::error::DaemonError;

/// What a PID file says about the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidState {
    /// The recorded process is alive.
    Running(u32),
    /// The file names a process that no longer exists.
    Stale(u32),
    /// No PID file.
    Absent,
}

/// Guards a project directory against a second daemon instance.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    locked: bool,
}

impl PidFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            locked: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the PID from the file.
    pub fn read_pid(&self) -> Result<Option<u32>, DaemonError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DaemonError::PidFileRead {
                    path: self.path.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let pid = contents
            .trim()
            .parse::<u32>()
            .map_err(|e| DaemonError::PidFileRead {
                path: self.path.clone(),
                reason: format!("Invalid PID format: {}", e),
            })?;

        Ok(Some(pid))
    }

    /// Classify the PID file without touching it.
    pub fn state(&self) -> Result<PidState, DaemonError> {
        Ok(match self.read_pid()? {
            Some(pid) if is_process_running(pid) => PidState::Running(pid),
            Some(pid) => PidState::Stale(pid),
            None => PidState::Absent,
        })
    }

    /// When the PID file was last written, as a stand-in for start time.
    pub fn written_at(&self) -> Option<DateTime<Local>> {
        let modified = fs::metadata(&self.path).ok()?.modified().ok()?;
        Some(DateTime::<Local>::from(modified))
    }

    /// Write the current process PID to the file.
    pub fn write_pid(&mut self) -> Result<(), DaemonError> {
        self.write_pid_value(std::process::id())
    }

    /// Write a specific PID value to the file.
    pub fn write_pid_value(&mut self, pid: u32) -> Result<(), DaemonError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| DaemonError::PidFileCreation {
                path: self.path.clone(),
                reason: format!("Failed to create parent directory: {}", e),
            })?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| DaemonError::PidFileCreation {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        write!(file, "{}", pid).map_err(|e| DaemonError::PidFileCreation {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        self.locked = true;
        info!(path = %self.path.display(), pid, "PID file created");
        Ok(())
    }

    /// Remove the PID file.
    pub fn remove(&mut self) -> Result<(), DaemonError> {
        self.locked = false;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "PID file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DaemonError::PidFileRemoval {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Claim the PID file for this process.
    ///
    /// Fails if a live process owns it. A stale file is replaced.
    pub fn try_acquire(&mut self) -> Result<(), DaemonError> {
        match self.state()? {
            PidState::Running(pid) if pid != std::process::id() => {
                return Err(DaemonError::AlreadyRunning {
                    path: self.path.clone(),
                    pid,
                });
            }
            PidState::Stale(pid) => {
                warn!(path = %self.path.display(), pid, "Removing stale PID file");
                self.remove()?;
            }
            _ => {}
        }

        self.write_pid()
    }

    /// Whether this handle wrote the file and still owns it.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Release the file if this handle owns it.
    pub fn release(&mut self) -> Result<(), DaemonError> {
        if self.locked {
            debug!(path = %self.path.display(), "Releasing PID file");
            self.remove()
        } else {
            Ok(())
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to remove PID file on drop: {}", e);
        }
    }
}

/// Whether a process with the given PID exists.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks for existence. EPERM means it exists but
    // belongs to someone else.
    match kill(Pid::from_raw(raw), None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    // No cheap liveness check here; assume the recorded process is alive.
    true
}

#[cfg(test)]
#[path = "pid_tests.rs"]
mod tests;
