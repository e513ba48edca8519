//! Beacon Daemon - Unified service discovery
//!
//! `beacond` discovers services from the local filesystem, the container
//! runtime and external catalogs, unifies them and keeps the registry current.

use std::path::PathBuf;
use std::time::Duration;

use beacon_daemon::{shutdown_signal, Beacon, BeaconConfig, DaemonError, DaemonResult};
use beacon_registry::ExportFormat;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Beacon Daemon CLI
#[derive(Parser)]
#[command(name = "beacond")]
#[command(about = "Beacon - Unified service discovery and registry engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BEACON_CONFIG")]
    config: Option<String>,

    /// Run a single discovery pass and exit
    #[arg(long)]
    once: bool,

    /// Seconds between continuous passes
    #[arg(short, long, env = "BEACON_INTERVAL")]
    interval: Option<u64>,

    /// Export the registry here before exiting
    #[arg(long)]
    export: Option<PathBuf>,

    /// Export format: json or csv
    #[arg(long, default_value = "json")]
    format: String,

    /// Log level
    #[arg(long, env = "BEACON_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "BEACON_LOG_JSON")]
    json: bool,
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = BeaconConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(interval) = cli.interval {
        config.orchestrator.interval_secs = interval;
    }
    let format: ExportFormat = cli
        .format
        .parse()
        .map_err(|e| DaemonError::Config(format!("Invalid export format: {}", e)))?;

    init_tracing(&config.logging.level, config.logging.json);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        once = cli.once,
        "Starting beacond"
    );

    let interval = Duration::from_secs(config.orchestrator.interval_secs);
    let beacon = Beacon::new(config).await?;

    let beacon = if cli.once {
        let records = beacon.run_once().await?;
        tracing::info!(services = records.len(), "Discovery pass finished");
        beacon
    } else {
        beacon.run_until(interval, shutdown_signal()).await?
    };

    if let Some(path) = cli.export {
        beacon.export_to(&path, format).await?;
    }

    tracing::info!("beacond stopped");
    Ok(())
}
