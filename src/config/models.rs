use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct AppConfig {
    #[garde(dive)]
    #[serde(default)]
    pub server: ServerConfig,

    #[garde(dive)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[garde(dive)]
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Where the in-memory product store gets its initial contents.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct CatalogConfig {
    /// JSON array of products. The store starts empty when unset.
    #[garde(skip)]
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[garde(range(min = 1024, max = 65535))]
    pub port: u16,

    #[garde(length(min = 1), custom(validate_bind_address))]
    #[serde(default = "default_bind")]
    pub bind: String,

    #[garde(range(min = 1, max = 300))]
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64, // seconds
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: default_bind(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Everything the telemetry layer needs to know about the service it
/// instruments. Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetryConfig {
    #[garde(length(min = 1))]
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[garde(length(min = 1))]
    #[serde(default = "default_service_version")]
    pub service_version: String,

    #[garde(skip)]
    #[serde(default)]
    pub environment: Environment,

    #[garde(dive)]
    #[serde(default)]
    pub tracing: TracingSettings,

    #[garde(dive)]
    #[serde(default)]
    pub metrics: MetricsSettings,

    #[garde(dive)]
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Upper bound for the aggregate telemetry shutdown, in milliseconds.
    #[garde(range(min = 1, max = 300_000))]
    #[serde(default = "default_telemetry_shutdown_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_service_name() -> String {
    "product-service".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_telemetry_shutdown_ms() -> u64 {
    5_000
}

impl TelemetryConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_version: default_service_version(),
            environment: Environment::default(),
            tracing: TracingSettings::default(),
            metrics: MetricsSettings::default(),
            logging: LoggingSettings::default(),
            shutdown_timeout_ms: default_telemetry_shutdown_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TracingSettings {
    #[garde(skip)]
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[garde(skip)]
    #[serde(default)]
    pub exporter: TraceExporterKind,

    /// Collector endpoint, e.g. `http://jaeger:4317`
    #[garde(length(min = 1), custom(validate_endpoint))]
    #[serde(default = "default_otlp_endpoint")]
    pub endpoint: String,

    /// Sample rate (0.0-1.0). 1.0 = sample all traces
    #[garde(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_sample_ratio")]
    pub sample_ratio: f64,

    #[garde(range(min = 1, max = 120))]
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_otlp_endpoint() -> String {
    "http://jaeger:4317".to_string()
}

fn default_sample_ratio() -> f64 {
    1.0
}

fn default_export_timeout() -> u64 {
    10
}

impl TracingSettings {
    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            exporter: TraceExporterKind::default(),
            endpoint: default_otlp_endpoint(),
            sample_ratio: default_sample_ratio(),
            export_timeout_secs: default_export_timeout(),
        }
    }
}

/// Span export backend, chosen by configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceExporterKind {
    /// Spans satisfy the API but are never sampled nor exported.
    None,
    /// Batched export to an OTLP/gRPC collector.
    #[default]
    Otlp,
}

impl TraceExporterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceExporterKind::None => "none",
            TraceExporterKind::Otlp => "otlp",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MetricsSettings {
    #[garde(skip)]
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[garde(length(min = 1), custom(validate_bind_address))]
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Scrape listener port. `0` disables the listener.
    #[garde(skip)]
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    #[garde(pattern(r"^/[A-Za-z0-9_\-/]*$"))]
    #[serde(default = "default_metrics_path")]
    pub path: String,

    #[garde(range(min = 10, max = 3_600_000))]
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_sample_interval() -> u64 {
    1_000
}

impl MetricsSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn scrape_enabled(&self) -> bool {
        self.enabled && self.port != 0
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_metrics_port(),
            path: default_metrics_path(),
            sample_interval_ms: default_sample_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingSettings {
    #[garde(length(min = 1), custom(validate_log_level))]
    #[serde(default = "default_log_level")]
    pub level: String, // trace, debug, info, warn, error

    #[garde(skip)]
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn validate_bind_address(value: &str, _: &()) -> garde::Result {
    value.parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| garde::Error::new("Invalid IP address"))
}

fn validate_log_level(value: &str, _: &()) -> garde::Result {
    value.parse::<LevelFilter>()
        .map(|_| ())
        .map_err(|_| garde::Error::new("Unknown log level"))
}

fn validate_endpoint(value: &str, _: &()) -> garde::Result {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(garde::Error::new("Endpoint must be an http(s) URL"))
    }
}
