//! # Relaycast Server
//!
//! Real-time relay: agents register channels and stream events and chat to
//! any number of viewers.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! relaycast
//!
//! # Run with environment variables
//! RELAYCAST_PORT=8080 RELAYCAST_HOST=0.0.0.0 relaycast
//! ```

mod auth;
mod config;
mod error;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaycast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Relaycast server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
