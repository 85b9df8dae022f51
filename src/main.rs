//! Wager Engine Server Binary

use clap::Parser;
use wager_engine::{api::ApiServer, ConfigLoader, WagerStorage};

#[derive(Parser, Debug)]
#[command(name = "wager-engine")]
#[command(about = "Double-or-nothing wager settlement engine", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// API server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// API server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Database directory (overrides config)
    #[arg(long)]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wager_engine=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.storage.data_dir = db_path;
    }
    loader.validate(&config)?;

    tracing::info!(data_dir = %config.storage.data_dir, "Opening wager database");
    let storage = WagerStorage::open(&config.storage)?;

    ApiServer::new(config, storage).run().await
}
