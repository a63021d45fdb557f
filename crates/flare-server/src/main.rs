//! # flare
//!
//! Room-scoped realtime signaling relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! flare
//!
//! # Run with custom config
//! flare  # reads flare.toml from the usual locations
//!
//! # Run with environment variables
//! FLARE_PORT=8080 FLARE_HOST=0.0.0.0 flare
//! ```

mod config;
mod handlers;
mod metrics;
mod reaper;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flare=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting flare server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
