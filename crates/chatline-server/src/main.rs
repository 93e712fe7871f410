//! # Chatline Server
//!
//! Real-time chat fan-out server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chatline
//!
//! # Run with a specific config file
//! CHATLINE_CONFIG=/path/to/chatline.toml chatline
//!
//! # Run with environment variables
//! CHATLINE_API_PORT=8080 CHATLINE_LIVE_PORT=9435 CHATLINE_HOST=0.0.0.0 chatline
//! ```

use anyhow::Result;
use chatline_server::config::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    tracing::info!(
        "Starting Chatline server on {} (API port {}, live port {})",
        config.host,
        config.api_port,
        config.live_port
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    chatline_server::run_server(config, cancel).await?;

    Ok(())
}
