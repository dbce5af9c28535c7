//! # poker
//!
//! Planning poker server binary: loads settings, opens the card store and
//! serves the WebSocket coordinator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use poker_engine::ManagerConfig;
use poker_server::ServerConfig;
use poker_settings::PokerSettings;
use poker_store::{CardRepo, Database};
use poker_telemetry::TelemetryConfig;

/// Planning poker session coordinator.
#[derive(Parser, Debug)]
#[command(name = "poker", about = "Planning poker session coordinator")]
struct Cli {
    /// Settings file (defaults to ~/.poker/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket server (default).
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Import card lists from a JSON file into the card store.
    Seed {
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => poker_settings::load_settings_from_path(path),
        None => poker_settings::load_settings(),
    }
    .context("failed to load settings")?;

    init_logging(&settings)?;

    let db_path = settings.store.resolved_db_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open card store at {}", db_path.display()))?;
    let cards = CardRepo::new(db);

    match cli.command.unwrap_or(Command::Serve { host: None, port: None }) {
        Command::Seed { file } => {
            let report = cards
                .import_file(&file)
                .with_context(|| format!("failed to import {}", file.display()))?;
            tracing::info!(lists = report.lists, cards = report.cards, "card store seeded");
            Ok(())
        }
        Command::Serve { host, port } => serve(settings, cards, host, port).await,
    }
}

fn init_logging(settings: &PokerSettings) -> Result<()> {
    let config = TelemetryConfig {
        log_level: poker_telemetry::parse_level(&settings.logging.level)?,
        json: settings.logging.json,
        ..Default::default()
    };
    poker_telemetry::init_telemetry(&config)?;
    Ok(())
}

async fn serve(
    settings: PokerSettings,
    cards: CardRepo,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let manager_config = ManagerConfig {
        closing_delay: settings.session.closing_delay(),
        deck: settings.session.deck()?,
    };
    let config = ServerConfig {
        host: host.unwrap_or(settings.server.host),
        port: port.unwrap_or(settings.server.port),
        max_send_queue: settings.server.max_send_queue,
        heartbeat_interval: Duration::from_secs(settings.server.heartbeat_interval_secs),
    };

    let metrics = match poker_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let handle = poker_server::start(config, Arc::new(cards), manager_config, metrics)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "planning poker server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
