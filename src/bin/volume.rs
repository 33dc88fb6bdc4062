//! Storage daemon binary

use anyhow::Result;
use clap::Parser;
use minidfs::{common::Config, volume::VolumeServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "minidfs-volume")]
#[command(about = "minidfs storage daemon: stores blocks by key")]
#[command(version)]
struct Args {
    /// TCP port to listen on
    port: Option<u16>,

    /// Interface to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Directory for block files
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Seconds a connection may sit idle before it is closed
    #[arg(long)]
    read_timeout: Option<u64>,

    /// Config file (defaults to ./minidfs.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let mut volume_config = config.volume;
    if let Some(port) = args.port {
        volume_config.bind_addr = format!("{}:{}", args.host, port);
    }
    if let Some(data_dir) = args.data_dir {
        volume_config.data_path = data_dir;
    }
    if let Some(secs) = args.read_timeout {
        anyhow::ensure!(secs > 0, "--read-timeout must be > 0");
        volume_config.read_timeout_secs = secs;
    }

    tracing::info!("Starting minidfs storage daemon v{}", minidfs::VERSION);
    tracing::info!("Listening on: {}", volume_config.bind_addr);

    let server = VolumeServer::new(volume_config);
    tokio::select! {
        result = server.serve() => {
            if let Err(e) = &result {
                tracing::error!("Storage daemon stopped: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down storage daemon");
        }
    }

    Ok(())
}
