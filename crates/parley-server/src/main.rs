//! # Parley Server
//!
//! Real-time presence and messaging server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parley
//!
//! # Run with a specific config file
//! PARLEY_CONFIG=/path/to/parley.toml parley
//!
//! # Override settings with environment variables
//! PARLEY__PORT=8080 PARLEY__HOST=0.0.0.0 parley
//! ```

use anyhow::Result;
use parley_server::{handlers, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!("Starting Parley server on {}:{}", config.host, config.port);

    handlers::run_server(config).await?;

    Ok(())
}
