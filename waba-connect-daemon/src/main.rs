//! waba-connect daemon
//!
//! Wires the synchronization engine to a WhatsApp provider REST API and
//! logs conversation activity as state changes. Also exposes one-shot
//! subcommands for scripting: a single fetch, an outbound send, and
//! seeding a conversation from a lead.

mod config;
mod http;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use waba_connect_engine::{Lead, SyncEngine};

use config::Config;
use http::HttpTransport;

#[derive(Parser)]
#[command(
    name = "waba-connect-daemon",
    about = "WhatsApp business conversation sync daemon",
    version
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG when set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll continuously and log conversation activity (default)
    Watch,
    /// Fetch once, log conversation summaries and exit
    Once,
    /// Send a message and wait for reconciliation
    Send {
        /// Counterparty phone number
        to: String,
        /// Message body
        message: String,
    },
    /// Seed an empty conversation from a lead
    Start {
        /// Lead name
        name: String,
        /// Lead phone number
        phone: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    info!(base_url = %config.api.base_url, account = %config.api.account_id, "loaded configuration");

    let transport = Arc::new(HttpTransport::new(&config.api));
    let engine = SyncEngine::new(transport, config.engine_config());

    match cli.command.unwrap_or(Command::Watch) {
        Command::Once => run_once(&engine).await,
        Command::Send { to, message } => run_send(&engine, &config, &to, &message).await,
        Command::Start { name, phone } => run_start(&engine, &name, &phone).await,
        Command::Watch => run_watch(&engine).await,
    }
}

async fn run_once(engine: &SyncEngine) -> Result<()> {
    engine.refresh_now().await;
    log_summaries(engine).await;
    Ok(())
}

async fn run_send(engine: &SyncEngine, config: &Config, to: &str, message: &str) -> Result<()> {
    engine.refresh_now().await;
    engine
        .send(to, message)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    info!(to = %to, "message accepted, waiting for reconciliation");

    tokio::time::sleep(config.sync.reconcile_delay() + Duration::from_millis(500)).await;
    engine.refresh_now().await;
    log_summaries(engine).await;
    Ok(())
}

async fn run_start(engine: &SyncEngine, name: &str, phone: &str) -> Result<()> {
    engine.refresh_now().await;
    engine
        .start_conversation(&Lead {
            name: name.to_string(),
            phone: phone.to_string(),
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    log_summaries(engine).await;
    Ok(())
}

async fn run_watch(engine: &SyncEngine) -> Result<()> {
    let mut revisions = engine.subscribe();
    engine.start();
    info!("watching for conversation updates, press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                log_summaries(engine).await;
            }
        }
    }

    engine.stop();
    Ok(())
}

async fn log_summaries(engine: &SyncEngine) {
    let conversations = engine.conversations().await;
    info!(
        conversations = conversations.len(),
        unread = engine.total_unread().await,
        "conversation state"
    );
    for conversation in conversations {
        let preview = conversation
            .last_message
            .as_ref()
            .map(|m| m.body.chars().take(40).collect::<String>())
            .unwrap_or_default();
        info!(
            name = %conversation.display_name,
            key = %conversation.key,
            unread = conversation.unread_count,
            last = %preview,
            "conversation"
        );
    }
}
