//! CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::channels::Channel;
use crate::config;
use crate::dispatcher::DeliveryDispatcher;
use crate::router::CommandRouter;
use crate::scheduler::TriggerScheduler;
use crate::store::TaskStore;

#[derive(Parser)]
#[command(name = "remindbot", about = "remindbot — Telegram reminder bot")]
struct Cli {
    /// Config file path (default: ~/.remindbot/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a template configuration file.
    Onboard,

    /// Run the bot (restore persisted reminders, then serve).
    Start,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    let _log_guard = crate::logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Onboard => cmd_onboard(cli.config.as_deref()),
        Commands::Start => cmd_start(cfg).await,
    }
}

// ---------------------------------------------------------------------------
// onboard
// ---------------------------------------------------------------------------

fn cmd_onboard(path: Option<&std::path::Path>) -> Result<()> {
    let cfg_path = path
        .map(PathBuf::from)
        .unwrap_or_else(config::config_path);
    if cfg_path.exists() {
        println!("Config already exists at {}", cfg_path.display());
        println!("Delete it first if you want to re-initialize.");
        return Ok(());
    }

    let cfg = config::Config::default();
    config::save_config(&cfg, Some(&cfg_path))?;
    println!("✓ Created config at {}", cfg_path.display());
    println!("\nNext steps:");
    println!("  1. Put your bot token under channels.telegram and set enabled: true");
    println!("  2. Run: remindbot start");
    Ok(())
}

// ---------------------------------------------------------------------------
// start
// ---------------------------------------------------------------------------

async fn cmd_start(cfg: config::Config) -> Result<()> {
    let db_path = config::database_path(&cfg);
    let store = Arc::new(
        TaskStore::open(&db_path)
            .with_context(|| format!("opening task store at {}", db_path.display()))?,
    );

    let mut bus = crate::bus::MessageBus::new();
    let inbound_tx = bus.inbound_sender();
    let inbound_rx = bus
        .take_inbound_receiver()
        .context("inbound receiver already taken")?;

    let (fire_tx, fire_rx) = tokio::sync::mpsc::channel(64);
    let scheduler = Arc::new(TriggerScheduler::new(fire_tx));

    // Restore every persisted trigger before any user input is accepted.
    let restored = scheduler.restore_all(&store).await?;
    info!(restored, "schedule restored from task store");

    let dispatcher = DeliveryDispatcher::new(
        Arc::clone(&store),
        "telegram",
        bus.outbound_tx_clone(),
        fire_rx,
    );
    tokio::spawn(dispatcher.run());

    let router = CommandRouter::new(
        Arc::clone(&store),
        Arc::clone(&scheduler),
        inbound_rx,
        bus.outbound_tx_clone(),
    );
    tokio::spawn(router.run());

    if cfg.channels.telegram.enabled {
        let tg_inbound = inbound_tx.clone();
        let tg_outbound = bus.subscribe_outbound();
        let tg_cfg = cfg.channels.telegram.clone();
        tokio::spawn(async move {
            match crate::channels::telegram::TelegramChannel::new(tg_cfg, tg_inbound, tg_outbound)
            {
                Ok(mut ch) => {
                    if let Err(e) = ch.start().await {
                        tracing::error!("Telegram channel error: {e:#}");
                    }
                }
                Err(e) => tracing::error!("Telegram channel init failed: {e:#}"),
            }
        });
    } else {
        tracing::warn!("Telegram channel disabled; timers run but nothing can be delivered");
    }

    info!("remindbot running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    Ok(())
}
