//! campaign-dispatch CLI entry point.
//!
//! Provides `start`, `revive`, and `ready` subcommands for running the
//! orchestrator daemon, performing one stuck-item sweep, or listing
//! campaigns that currently have ready work.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use campaign_dispatch::channel::HttpChannelAdapter;
use campaign_dispatch::config::DispatchConfig;
use campaign_dispatch::logging;
use campaign_dispatch::orchestrator::{revival, DispatchDeps, Orchestrator, OrchestratorSettings};
use campaign_dispatch::store::{DispatchStore, SqliteStore};

/// campaign-dispatch: paced, crash-safe delivery of queued campaign messages.
#[derive(Parser)]
#[command(name = "campaign-dispatch", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator until interrupted.
    Start,
    /// Revert stuck processing items to pending once and exit.
    Revive,
    /// List campaigns that have ready work and exit.
    Ready,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = DispatchConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Start => handle_start(config).await,
        Command::Revive => handle_revive(config).await,
        Command::Ready => handle_ready(config).await,
    }
}

/// Run the orchestrator daemon.
async fn handle_start(config: DispatchConfig) -> anyhow::Result<()> {
    let _logging_guard = logging::init_production(&config.logging)?;

    let store = open_store(&config).await?;
    let channel = HttpChannelAdapter::new(
        &config.transport.base_url,
        config.transport.connect_timeout_secs,
        config.transport.request_timeout_secs,
    );

    info!(
        database = %config.database.path.display(),
        transport = %channel.base_url(),
        "campaign dispatcher started"
    );

    let deps = DispatchDeps {
        store: Arc::new(store),
        channel: Arc::new(channel),
    };
    let orchestrator = Orchestrator::new(deps, OrchestratorSettings::from(&config));

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(orchestrator.run(stop_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested, waiting for campaign loops to reach a sleep point");

    // The orchestrator also stops when the sender is dropped.
    let _ = stop_tx.send(true);
    handle.await.context("orchestrator task failed")?;

    info!("campaign dispatcher stopped");
    Ok(())
}

/// Run one stuck-item revival sweep.
async fn handle_revive(config: DispatchConfig) -> anyhow::Result<()> {
    logging::init_cli(&config.logging.level);

    let store = open_store(&config).await?;
    let ttl = config.orchestrator.stuck_ttl();
    let count = revival::revive_stale_items(&store, ttl, chrono::Utc::now())
        .await
        .context("revival sweep failed")?;

    info!(count, ttl_secs = ttl.as_secs(), "revival sweep complete");
    Ok(())
}

/// List campaigns with ready work.
async fn handle_ready(config: DispatchConfig) -> anyhow::Result<()> {
    logging::init_cli(&config.logging.level);

    let store = open_store(&config).await?;
    let campaigns = store
        .find_distinct_ready_campaigns(chrono::Utc::now())
        .await
        .context("failed to query ready campaigns")?;

    if campaigns.is_empty() {
        info!("no campaign has ready work");
    } else {
        for campaign_id in &campaigns {
            info!(campaign_id = %campaign_id, "ready");
        }
    }
    Ok(())
}

async fn open_store(config: &DispatchConfig) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(&config.database.path, config.database.max_connections).await
}
