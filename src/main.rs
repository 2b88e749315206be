//! meterdb server
//!
//! Loads configuration, starts the datastore and runs until interrupted.

use anyhow::Context;
use clap::Parser;
use meterdb::{generate_default_config, Config, Datastore};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "meterdb", version, about = "Time-series store for polled device counters")]
struct Args {
    /// Path to a TOML config file; defaults to the standard locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory from config
    #[arg(long)]
    data_dir: Option<String>,

    /// Print a default config file and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {:?}", path))?,
        None => Config::load_default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }

    init_logging(&config);

    tracing::info!("meterdb v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {}", config.storage.data_dir);

    if config.counters.is_empty() {
        anyhow::bail!("no counters configured; every ingested point would be dropped");
    }

    let db = Datastore::open(&config).context("opening datastore")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    tracing::info!("Shutting down...");
    db.shutdown().await;
    tracing::info!("meterdb shutdown complete");

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| format!("meterdb={}", config.logging.level)),
    );

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
