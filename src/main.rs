//! Token feed synchronizer daemon
//!
//! Mirrors the upstream token lifecycle feed and logs bucket/status
//! transitions until interrupted.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use token_feed_sync::{FeedConfig, FeedSynchronizer, HttpTransport};

#[derive(Parser)]
#[command(name = "token-feed-sync")]
#[command(about = "Real-time bucketed token feed synchronizer")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "feed.toml")]
    config: String,

    /// Override the snapshot endpoint
    #[arg(long)]
    snapshot_url: Option<String>,

    /// Override the stream endpoint
    #[arg(long)]
    stream_url: Option<String>,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,

    /// Dry run mode (validate config and exit)
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if std::path::Path::new(&cli.config).exists() {
        FeedConfig::from_file(&cli.config)?
    } else {
        warn!("Config file not found, using defaults: {}", cli.config);
        FeedConfig::default()
    };

    // Apply CLI overrides
    if let Some(snapshot_url) = cli.snapshot_url {
        config.endpoints.snapshot_url = snapshot_url;
    }
    if let Some(stream_url) = cli.stream_url {
        config.endpoints.stream_url = stream_url;
    }
    if let Some(log_level) = cli.log_level {
        config.monitoring.log_level = log_level;
    }

    init_logging(&config);

    info!("Starting token feed synchronizer");
    info!("Snapshot endpoint: {}", config.endpoints.snapshot_url);
    info!("Stream endpoint: {}", config.endpoints.stream_url);

    config.check()?;
    info!("Configuration validated successfully");

    if cli.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        return Ok(());
    }

    let transport = Arc::new(HttpTransport::new(
        config.endpoints.snapshot_url.clone(),
        config.endpoints.stream_url.clone(),
        config.endpoints.request_timeout(),
    ));
    let synchronizer = FeedSynchronizer::start(transport, config.feed.tuning());

    // Log every status transition until shutdown.
    let mut updates = synchronizer.subscribe();
    let monitor = tokio::spawn(async move {
        let mut last_status = updates.borrow().status.clone();
        while updates.changed().await.is_ok() {
            let state = updates.borrow().clone();
            if state.status != last_status {
                info!(
                    loading = state.status.is_loading,
                    connected = state.status.is_connected,
                    error = state.status.error.as_deref().unwrap_or(""),
                    new = state.buckets.incoming.len(),
                    near_completion = state.buckets.near_threshold.len(),
                    completed = state.buckets.finalized.len(),
                    "Feed status changed"
                );
                last_status = state.status.clone();
            }
        }
    });

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    synchronizer.deactivate();
    monitor.abort();

    Ok(())
}

fn init_logging(config: &FeedConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_level));

    if config.monitoring.structured_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
