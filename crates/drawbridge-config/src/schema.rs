//! Configuration schema definitions.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the per-project state directory under the working directory.
pub const STATE_DIR_NAME: &str = ".drawbridge";

fn default_true() -> bool {
    true
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Whether annotations are auto-processed or queued for an external agent.
    #[serde(default)]
    pub mode: Mode,

    /// Project root the agent edits. Defaults to the current directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Delivery mode, fixed for the lifetime of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Drive the configured agent for every annotation.
    #[default]
    Auto,
    /// Leave annotations pending for pull over the control protocol.
    Queued,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Queued => "queued",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Mode::Auto),
            "queued" | "queue" => Ok(Mode::Queued),
            other => Err(ConfigError::InvalidValue {
                field: "mode".to_string(),
                message: format!("unknown mode '{other}', expected auto or queued"),
            }),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Live channel and HTTP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Queue protocol (JSON-RPC) port.
    #[serde(default = "default_control_port")]
    pub control_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            control_port: default_control_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4747
}

fn default_control_port() -> u16 {
    4748
}

/// Which agent CLI drives auto mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Claude,
    Codex,
    /// Any executable speaking the plain line protocol.
    Command,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::Codex => "codex",
            ProviderKind::Command => "command",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(ProviderKind::Claude),
            "codex" => Ok(ProviderKind::Codex),
            "command" => Ok(ProviderKind::Command),
            other => Err(ConfigError::InvalidValue {
                field: "agent.provider".to_string(),
                message: format!("unknown provider '{other}'"),
            }),
        }
    }
}

/// Agent invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Binary to run instead of the provider default. Required for `command`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Extra arguments appended to the provider command line.
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Time between SIGTERM and SIGKILL.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    /// Restore files touched by a failed run.
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            command: None,
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            grace_period_secs: default_grace_period_secs(),
            max_prompt_chars: default_max_prompt_chars(),
            rollback_on_failure: true,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_max_prompt_chars() -> usize {
    8000
}

/// Annotation store persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Defaults to `<state_dir>/annotations`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist: true,
            path: None,
        }
    }
}

/// Working tree snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Defaults to `<state_dir>/snapshots`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Extra glob patterns excluded from capture.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Files larger than this are neither captured nor reverted.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: None,
            ignore: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    8 * 1024 * 1024
}

/// Long-poll limits for the `watch` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_watch_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_watch_max_secs")]
    pub max_timeout_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_watch_timeout_secs(),
            max_timeout_secs: default_watch_max_secs(),
        }
    }
}

impl WatchConfig {
    /// Effective wait for a caller-requested timeout.
    pub fn effective_timeout(&self, requested_secs: Option<u64>) -> Duration {
        let secs = requested_secs
            .unwrap_or(self.default_timeout_secs)
            .min(self.max_timeout_secs);
        Duration::from_secs(secs)
    }
}

fn default_watch_timeout_secs() -> u64 {
    30
}

fn default_watch_max_secs() -> u64 {
    300
}

/// Daemon process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Defaults to `<state_dir>/drawbridge.pid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<PathBuf>,

    /// Defaults to `<work_dir>/.drawbridge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: None,
            state_dir: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl DaemonConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Values supplied on the command line, applied over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub control_port: Option<u16>,
    pub mode: Option<Mode>,
    pub provider: Option<ProviderKind>,
    pub work_dir: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(port) = overrides.control_port {
            self.server.control_port = port;
        }
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        if let Some(provider) = overrides.provider {
            self.agent.provider = provider;
        }
        if let Some(work_dir) = overrides.work_dir {
            self.work_dir = Some(work_dir);
        }
    }

    /// Make every path absolute and fill in derived defaults.
    ///
    /// Relative paths are taken against `base` (normally the process cwd).
    /// After this every path getter returns a concrete location.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let absolutize = |p: &Path| -> PathBuf {
            let expanded = PathBuf::from(crate::ConfigLoader::expand_path(&p.to_string_lossy()));
            if expanded.is_absolute() {
                expanded
            } else {
                base.join(expanded)
            }
        };

        let work_dir = self
            .work_dir
            .as_deref()
            .map(absolutize)
            .unwrap_or_else(|| base.to_path_buf());
        let state_dir = self
            .daemon
            .state_dir
            .as_deref()
            .map(absolutize)
            .unwrap_or_else(|| work_dir.join(STATE_DIR_NAME));

        self.store.path = Some(
            self.store
                .path
                .as_deref()
                .map(absolutize)
                .unwrap_or_else(|| state_dir.join("annotations")),
        );
        self.snapshot.path = Some(
            self.snapshot
                .path
                .as_deref()
                .map(absolutize)
                .unwrap_or_else(|| state_dir.join("snapshots")),
        );
        self.daemon.pid_file = Some(
            self.daemon
                .pid_file
                .as_deref()
                .map(absolutize)
                .unwrap_or_else(|| state_dir.join("drawbridge.pid")),
        );
        self.daemon.state_dir = Some(state_dir);
        self.work_dir = Some(work_dir);
        self
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.daemon
            .state_dir
            .clone()
            .unwrap_or_else(|| self.work_dir().join(STATE_DIR_NAME))
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("annotations"))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot
            .path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("snapshots"))
    }

    pub fn pid_file(&self) -> PathBuf {
        self.daemon
            .pid_file
            .clone()
            .unwrap_or_else(|| self.state_dir().join("drawbridge.pid"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    /// Live channel / HTTP listen address.
    pub fn live_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Control protocol listen address.
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.control_port)
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
