//! # Huddle Server
//!
//! A single chat room over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with a specific config file
//! HUDDLE_CONFIG=/path/to/huddle.toml huddle
//!
//! # Override settings from the environment
//! HUDDLE_PORT=8080 HUDDLE__ROOM__ECHO_TO_SENDER=false HUDDLE__TRACE__ENABLED=true huddle
//! ```

mod config;
mod handlers;
mod identity;
mod metrics;
mod stamping;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_core=debug,huddle_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Huddle server on {}:{}", config.host, config.port);

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
    }

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
