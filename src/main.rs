//! Drawbridge - browser design annotations for code-editing agents
//!
//! Main entry point for the Drawbridge CLI and daemon.

mod cli;
mod cmd_daemon;
mod mcp_bridge;
mod server;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use drawbridge_config::{Config, ConfigLoader, ConfigValidator, ValidationResult};

use crate::cli::{Cli, Commands, DaemonAction, RunArgs};

/// Rolling log files kept on disk.
const MAX_LOG_FILES: usize = 14;

/// Initialize tracing with console output and, when `log_dir` is given,
/// a daily rolling log file.
fn init_tracing(log_dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Console logs go to stderr; stdout carries the mcp bridge protocol.
    let console = fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    let file = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("drawbridge")
                .filename_suffix("log")
                .max_log_files(MAX_LOG_FILES)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            // Keep the writer alive for the program duration.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

/// Load the configuration file, apply CLI overrides and resolve paths.
fn load_config(
    config_path: Option<&Path>,
    work_dir: Option<PathBuf>,
    args: &RunArgs,
) -> Result<(Config, ValidationResult), Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let project_dir = work_dir
        .as_deref()
        .map(|dir| cwd.join(dir))
        .unwrap_or_else(|| cwd.clone());

    let mut config = ConfigLoader::load_or_default(config_path, &project_dir)?;
    config.apply_overrides(args.overrides(work_dir));
    let config = config.resolve_paths(&cwd);
    let validation = ConfigValidator::validate(&config);
    Ok((config, validation))
}

/// Log validation findings; errors abort startup.
fn check_validation(validation: &ValidationResult) -> Result<(), Box<dyn std::error::Error>> {
    for warning in &validation.warnings {
        warn!("config: {}", warning);
    }
    if validation.is_valid() {
        return Ok(());
    }
    for err in &validation.errors {
        error!("config: {}", err);
    }
    Err(format!("invalid configuration ({} errors)", validation.errors.len()).into())
}

fn absolute(path: Option<PathBuf>) -> Result<Option<PathBuf>, std::io::Error> {
    match path {
        Some(path) if path.is_relative() => Ok(Some(std::env::current_dir()?.join(path))),
        other => Ok(other),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = absolute(cli.config)?;

    match cli.command {
        Some(Commands::Mcp { url }) => {
            init_tracing(None)?;
            mcp_bridge::run_stdio_bridge(&url).await
        }
        Some(Commands::Daemon { action }) => {
            let args = match &action {
                DaemonAction::Start(args) => args.clone(),
                _ => RunArgs::default(),
            };
            let (config, validation) = load_config(config_path.as_deref(), cli.work_dir, &args)?;
            init_tracing(None)?;
            if matches!(action, DaemonAction::Start(_)) {
                check_validation(&validation)?;
            }
            cmd_daemon::handle_daemon_command(action, config, config_path).await
        }
        Some(Commands::Run(args)) => {
            run(config_path.as_deref(), cli.work_dir, &args).await
        }
        None => run(config_path.as_deref(), cli.work_dir, &RunArgs::default()).await,
    }
}

async fn run(
    config_path: Option<&Path>,
    work_dir: Option<PathBuf>,
    args: &RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config, validation) = load_config(config_path, work_dir, args)?;
    init_tracing(Some(&config.log_dir()))?;
    check_validation(&validation)?;

    if let Err(e) = server::run_server(config).await {
        error!("Drawbridge failed: {}", e);
        return Err(e);
    }
    Ok(())
}
