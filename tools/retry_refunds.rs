//! One pass of the refund outbox against a wager database.
//!
//! Usage: retry_refunds --db-path ./wager_data [--config wager.toml] [--force]
//!
//! Refunds are signed with `refunds.treasury_key_hex` (or `WAGER_TREASURY_KEY`),
//! so set it to sign as the server does. The treasury balance is the configured
//! opening balance of this process and is not shared with a running server.

use clap::Parser;
use std::sync::Arc;
use wager_engine::{
    api::treasury_from_config,
    invoices::RocksInvoiceStore,
    metrics::WagerMetrics,
    wager::{
        randomness::OsRandomness, rate_limit::SlidingWindowLimiter, Collaborators, SettlementCoordinator,
    },
    ConfigLoader, WagerStorage,
};

#[derive(Parser, Debug)]
#[command(name = "retry_refunds")]
#[command(about = "Dispatch due refund intents once and exit", long_about = None)]
struct Args {
    /// Database directory
    #[arg(long)]
    db_path: Option<String>,

    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Also retry intents that exhausted their attempts
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wager_engine=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(db_path) = args.db_path {
        config.storage.data_dir = db_path;
    }
    config.storage.clear_on_start = false;

    println!("Opening database: {}", config.storage.data_dir);
    let storage = WagerStorage::open(&config.storage)?;

    let collaborators = Collaborators {
        invoices: Arc::new(RocksInvoiceStore::new(storage.clone())),
        randomness: Arc::new(OsRandomness),
        rate_limiter: Arc::new(SlidingWindowLimiter::from_config(&config.rate_limit)),
        dispatcher: Arc::new(treasury_from_config(&config)?),
    };
    let coordinator = SettlementCoordinator::new(storage, &config, collaborators, Arc::new(WagerMetrics::new()?));

    let summary = coordinator.outbox().run_due(args.force).await?;

    println!("Refund pass complete");
    println!("   sent:      {}", summary.sent);
    println!("   failed:    {}", summary.failed);
    println!("   exhausted: {}", summary.exhausted);
    println!("   skipped:   {}", summary.skipped);

    Ok(())
}
