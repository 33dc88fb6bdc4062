//! Coordinator binary

use clap::Parser;
use minidfs::{common::Config, Coordinator};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs-coord")]
#[command(about = "minidfs coordinator: block placement and file catalog")]
#[command(version)]
struct Cli {
    /// Bind address for client connections
    #[arg(long)]
    bind: Option<String>,

    /// Node registry file (one storage daemon address per line)
    #[arg(long)]
    registry: Option<PathBuf>,

    /// JSON catalog file
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Largest block count a single put may request
    #[arg(long)]
    max_blocks_per_file: Option<usize>,

    /// Config file (defaults to ./minidfs.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file, then override with CLI arguments
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut coord_config = config.coordinator;
    if let Some(bind) = cli.bind {
        coord_config.bind_addr = bind;
    }
    if let Some(registry) = cli.registry {
        coord_config.registry_path = registry;
    }
    if let Some(catalog) = cli.catalog {
        coord_config.catalog_path = catalog;
    }
    if let Some(max_blocks) = cli.max_blocks_per_file {
        anyhow::ensure!(max_blocks > 0, "--max-blocks-per-file must be > 0");
        coord_config.max_blocks_per_file = max_blocks;
    }

    tracing::info!("Starting minidfs coordinator v{}", minidfs::VERSION);
    tracing::info!("  Bind: {}", coord_config.bind_addr);
    tracing::info!("  Registry: {}", coord_config.registry_path.display());
    tracing::info!("  Catalog: {}", coord_config.catalog_path.display());

    let coord = Coordinator::new(coord_config);
    tokio::select! {
        result = coord.serve() => {
            if let Err(e) = &result {
                tracing::error!("Coordinator stopped: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down coordinator");
        }
    }

    Ok(())
}
