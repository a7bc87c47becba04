//! # Parlor Server
//!
//! Multi-room realtime chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parlor
//!
//! # Run with a specific config file
//! PARLOR_CONFIG=/path/to/parlor.toml parlor
//!
//! # Run with environment variables
//! PARLOR_PORT=8080 PARLOR_HOST=0.0.0.0 PARLOR_STORAGE__BACKEND=memory parlor
//! ```

use anyhow::Result;
use parlor_server::{build_hub, metrics, run_server, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!("Starting Parlor server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    let hub = build_hub(&config).await?;
    run_server(config, hub).await?;

    Ok(())
}
