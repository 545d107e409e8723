//! # Courier
//!
//! Channel-based publish/subscribe broker.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! courier
//!
//! # Run with a config file
//! COURIER_CONFIG=/path/to/courier.toml courier
//!
//! # Override the bind address
//! COURIER_PORT=9090 COURIER_HOST=0.0.0.0 courier
//! ```

use anyhow::Result;
use courier_server::{config::Config, handlers};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,courier_core=debug,courier_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!("Starting Courier on {}:{}", config.server.host, config.server.port);

    handlers::run_server(config).await
}
