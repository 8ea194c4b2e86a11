//! Termhub Daemon
//!
//! Shares one shell and a watched directory with remote viewers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::network::{self, AppState};
use daemon::orchestrator::{HubEvent, HubOrchestrator};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Termhub - share a live shell and a directory with remote viewers.
#[derive(Parser, Debug)]
#[command(name = "termhub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the hub and serve viewers
    Serve {
        /// Address to listen on (overrides config)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Directory to watch and serve (overrides config)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Shell to run (overrides config)
        #[arg(long, value_name = "PATH")]
        shell: Option<String>,
    },

    /// Print the file tree of a directory as JSON
    Tree {
        /// Directory to list (defaults to the configured watch root)
        dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    if let Commands::Serve { bind, root, shell } = &cli.command {
        if let Some(bind) = bind {
            config.server.bind = bind.clone();
        }
        if let Some(root) = root {
            config.watch.root = root.clone();
        }
        if let Some(shell) = shell {
            config.session.shell = shell.clone();
        }
    }

    let _log_guard = init_tracing(cli.verbose, &config)?;
    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    match cli.command {
        Commands::Serve { .. } => {
            config.validate()?;
            run_server(config).await?;
        }
        Commands::Tree { dir } => {
            let dir = dir.unwrap_or_else(|| config.watch.root.clone());
            let tree = daemon::files::list_tree(&dir)
                .with_context(|| format!("Failed to list {}", dir.display()))?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Sets up logging to stderr, or to `log_file` when configured.
///
/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
/// The returned guard must be held until exit so buffered lines are flushed.
fn init_tracing(verbose: bool, config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let Some(log_file) = &config.daemon.log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    };

    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .with_context(|| format!("log_file must name a file: {}", log_file.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

/// Runs the hub and its host until a signal arrives or the shell exits.
async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("Termhub starting...");

    let listener = network::bind(config.bind_addr()?).await?;

    let hub = Arc::new(HubOrchestrator::new(config));

    // Subscribe before starting so no lifecycle event is missed
    let mut events = hub.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                HubEvent::StateChanged(state) => {
                    tracing::info!("Hub state: {:?}", state);
                }
                HubEvent::ViewerConnected { viewer_id } => {
                    tracing::debug!("Viewer connected: {}", viewer_id);
                }
                HubEvent::ViewerDisconnected { viewer_id, reason } => {
                    tracing::debug!("Viewer disconnected: {} ({})", viewer_id, reason);
                }
                HubEvent::SessionEnded { reason } => {
                    tracing::info!("Session ended: {}", reason);
                }
            }
        }
    });

    hub.start().await?;

    let server = tokio::spawn(network::serve(listener, AppState::new(Arc::clone(&hub))));

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
        _ = hub.wait_stopped() => {
            tracing::info!("Hub stopped on its own");
        }
    }

    hub.stop().await?;

    match server.await {
        Ok(result) => result?,
        Err(e) => anyhow::bail!("Server task failed: {}", e),
    }

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            tracing::warn!("Failed to register signal handlers, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_command() {
        let cli = Cli::try_parse_from(["termhub", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { bind, root, shell } => {
                assert!(bind.is_none());
                assert!(root.is_none());
                assert!(shell.is_none());
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_with_overrides() {
        let cli = Cli::try_parse_from([
            "termhub",
            "serve",
            "--bind",
            "127.0.0.1:9100",
            "--root",
            "/srv/shared",
            "--shell",
            "/bin/bash",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve { bind, root, shell } => {
                assert_eq!(bind.as_deref(), Some("127.0.0.1:9100"));
                assert_eq!(root, Some(PathBuf::from("/srv/shared")));
                assert_eq!(shell.as_deref(), Some("/bin/bash"));
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_tree_command() {
        let cli = Cli::try_parse_from(["termhub", "tree"]).unwrap();
        assert!(matches!(cli.command, Commands::Tree { dir: None }));

        let cli = Cli::try_parse_from(["termhub", "tree", "./user"]).unwrap();
        match cli.command {
            Commands::Tree { dir } => assert_eq!(dir, Some(PathBuf::from("./user"))),
            _ => panic!("Expected Tree command"),
        }
    }

    #[test]
    fn test_config_command() {
        let cli = Cli::try_parse_from(["termhub", "config"]).unwrap();
        assert!(matches!(cli.command, Commands::Config));
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["termhub", "serve", "--config", "/etc/termhub.toml", "-v"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/termhub.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_missing_subcommand() {
        assert!(Cli::try_parse_from(["termhub"]).is_err());
    }
}
