//! CLI definitions for Drawbridge.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use drawbridge_config::{ConfigOverrides, Mode, ProviderKind};

/// Drawbridge CLI.
#[derive(Parser)]
#[command(name = "drawbridge")]
#[command(about = "Bridges browser design annotations to code-editing agents")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ./drawbridge.toml if present)
    #[arg(short, long, global = true, env = "DRAWBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Project directory the agent edits
    #[arg(short, long, global = true)]
    pub work_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the daemon in the foreground (default)
    Run(RunArgs),

    /// Manage a background daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Bridge a stdio MCP client to the daemon's control endpoint
    Mcp {
        /// Control endpoint URL
        #[arg(long, default_value = "http://127.0.0.1:4748/mcp")]
        url: String,
    },
}

/// Settings that override the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct RunArgs {
    /// Listen host
    #[arg(long)]
    pub host: Option<String>,

    /// Live channel and HTTP port
    #[arg(long)]
    pub port: Option<u16>,

    /// Queue protocol port
    #[arg(long)]
    pub control_port: Option<u16>,

    /// Delivery mode (auto, queued)
    #[arg(long)]
    pub mode: Option<Mode>,

    /// Agent provider for auto mode (claude, codex, command)
    #[arg(long)]
    pub provider: Option<ProviderKind>,
}

impl RunArgs {
    pub fn overrides(&self, work_dir: Option<PathBuf>) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            control_port: self.control_port,
            mode: self.mode,
            provider: self.provider,
            work_dir,
        }
    }

    /// The same flags as command-line arguments, for a detached child.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(host) = &self.host {
            args.extend(["--host".to_string(), host.clone()]);
        }
        if let Some(port) = self.port {
            args.extend(["--port".to_string(), port.to_string()]);
        }
        if let Some(port) = self.control_port {
            args.extend(["--control-port".to_string(), port.to_string()]);
        }
        if let Some(mode) = self.mode {
            args.extend(["--mode".to_string(), mode.to_string()]);
        }
        if let Some(provider) = self.provider {
            args.extend(["--provider".to_string(), provider.to_string()]);
        }
        args
    }
}

#[derive(Subcommand)]
pub(crate) enum DaemonAction {
    /// Start the daemon in the background
    Start(RunArgs),

    /// Stop the daemon
    Stop {
        /// Kill immediately instead of waiting for a graceful shutdown
        #[arg(long)]
        force: bool,

        /// Seconds to wait for the process to exit
        #[arg(long, default_value_t = 15)]
        timeout: u64,
    },

    /// Report whether the daemon is running
    Status,
}
