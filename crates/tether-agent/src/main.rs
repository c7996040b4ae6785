//! # tether-agent
//!
//! `serve` runs the backend (orchestrator, agent poller, HTTP + WebSocket).
//! `supervise` runs the stdio front process that spawns and relays to it.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tether_runtime::Collaborators;
use tether_server::TetherServer;
use tether_settings::TetherSettings;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Event-driven orchestration backend for a long-running agent session.
#[derive(Parser, Debug)]
#[command(name = "tether-agent", version, about)]
struct Cli {
    /// Settings file (defaults to `$TETHER_SETTINGS` or `~/.tether/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run the backend server.
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Spawn the backend and speak JSON-RPC on stdin/stdout.
    Supervise,
}

fn load(cli: &Cli) -> Result<TetherSettings> {
    let path = cli.settings.clone().unwrap_or_else(tether_settings::settings_path);
    let mut settings = tether_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    if let Command::Serve { host, port } = &cli.command {
        if let Some(host) = host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = port {
            settings.server.port = *port;
        }
    }
    // the spawned backend must read the same settings file
    if cli.command == Command::Supervise && settings.supervisor.backend_command.is_empty() {
        if let Some(path) = &cli.settings {
            settings.supervisor.backend_args.push("--settings".to_string());
            settings.supervisor.backend_args.push(path.display().to_string());
        }
    }
    Ok(settings)
}

async fn serve(settings: TetherSettings) -> Result<()> {
    // collaborators are provided by embedding applications; the binary runs without them
    let server = TetherServer::new(settings, Collaborators::none());
    server.run().await.context("Backend server failed")?;
    info!("backend exited");
    Ok(())
}

async fn supervise(settings: TetherSettings) -> Result<()> {
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    drop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            signal.cancel();
        }
    }));
    tether_supervisor::run_stdio(&settings, cancel)
        .await
        .context("Supervisor failed")?;
    info!("supervisor exited");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    tether_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    match cli.command {
        Command::Serve { .. } => serve(settings).await,
        Command::Supervise => supervise(settings).await,
    }
}
