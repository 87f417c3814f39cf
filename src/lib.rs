pub mod config;
pub mod error;
pub mod health;
pub mod middleware;
pub mod observability;
pub mod products;
pub mod server;

pub use config::*;
pub use error::*;
pub use server::*;

use anyhow::Result;
use std::panic;

/// Main server entry point for library usage
pub async fn run_server() -> Result<()> {
    let app_config = config::load_config()?;

    // Telemetry installs the global subscriber, so nothing is logged before it.
    let telemetry = observability::setup(&app_config.telemetry).await?;
    ::tracing::info!(tracing_enabled = telemetry.tracing_enabled(), "Observability initialized");

    // Recovery happens in the router; the hook only makes panics visible in the log.
    panic::set_hook(Box::new(|panic_info| {
        ::tracing::error!(%panic_info, "Panic occurred");
    }));

    ::tracing::info!("{} starting up", app_config.telemetry.service_name);

    let served = server::start_server(app_config, telemetry.clone()).await;

    if let Err(e) = telemetry.shutdown().await {
        ::tracing::error!(error = %e, "Telemetry shutdown reported errors");
    }

    served
}
