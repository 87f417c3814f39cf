use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use figment::{Figment, providers::{Env, Format, Serialized, Toml}};
use garde::Validate;

use super::AppConfig;

#[derive(Parser, Clone, Debug, Default)]
#[command(name = "product-service", version, about = "Product service with built-in telemetry")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, env = "APP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server port
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Environment name (development, testing, staging, production)
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,

    /// Prometheus scrape port, 0 disables the listener
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// OTLP collector endpoint
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Parse the command line and load the layered configuration.
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&Cli::parse())
}

/// Layers, lowest priority first: embedded defaults, `config/default.toml`,
/// `config/<env>.toml` (or `--config`), `APP_` env vars, CLI flags.
pub fn load_config_from(cli: &Cli) -> Result<AppConfig> {
    let env_name = cli.environment.clone().unwrap_or_else(||
        std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
    );

    let mut figment = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file("config/default.toml"))
        .merge(Toml::file(format!("config/{}.toml", env_name)));

    if let Some(path) = &cli.config {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment
        .merge(Env::prefixed("APP_").split("__"))
        .merge(("telemetry.environment", env_name.as_str()));

    if let Some(port) = cli.port {
        figment = figment.merge(("server.port", port));
    }
    if let Some(port) = cli.metrics_port {
        figment = figment.merge(("telemetry.metrics.port", port));
    }
    if let Some(endpoint) = &cli.otlp_endpoint {
        figment = figment.merge(("telemetry.tracing.endpoint", endpoint.as_str()));
    }
    if cli.debug {
        figment = figment.merge(("telemetry.logging.level", "debug"));
    }

    let config: AppConfig = figment.extract()?;

    config.validate()?;

    Ok(config)
}
