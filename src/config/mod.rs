pub mod models;
pub mod validation;

pub use models::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::*;
    use figment::{Figment, providers::{Env, Format, Toml, Serialized}};
    use garde::Validate;
    use std::io::Write;

    #[test]
    fn test_valid_config_loads() {
        let config_toml = r#"
            [server]
            port = 8080
            bind = "0.0.0.0"

            [telemetry]
            service_name = "product-service"
            environment = "staging"

            [telemetry.tracing]
            exporter = "none"
            sample_ratio = 0.25

            [telemetry.metrics]
            port = 9464
            path = "/prom"

            [telemetry.logging]
            level = "warn"
            format = "pretty"

            [catalog]
            seed_file = "data/products.json"
        "#;

        let config: AppConfig = Figment::new()
            .merge(Toml::string(config_toml))
            .extract()
            .expect("Should parse valid config");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.telemetry.environment, Environment::Staging);
        assert_eq!(config.telemetry.tracing.exporter, TraceExporterKind::None);
        assert_eq!(config.telemetry.tracing.sample_ratio, 0.25);
        assert_eq!(config.telemetry.metrics.port, 9464);
        assert_eq!(config.telemetry.metrics.path, "/prom");
        assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
        assert_eq!(
            config.catalog.seed_file.as_deref(),
            Some(std::path::Path::new("data/products.json"))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_rejected() {
        let config_toml = r#"
            [server]
            port = 80
            bind = "0.0.0.0"
        "#;

        let config: AppConfig = Figment::new()
            .merge(Toml::string(config_toml))
            .extract()
            .expect("Should parse");

        let validation = config.validate();
        assert!(validation.is_err());
        assert!(validation.unwrap_err().to_string().contains("port"));
    }

    #[test]
    fn test_telemetry_defaults() {
        let config = TelemetryConfig::default();

        assert_eq!(config.environment, Environment::Development);
        assert!(config.tracing.enabled);
        assert_eq!(config.tracing.endpoint, "http://jaeger:4317");
        assert_eq!(config.metrics.port, 9090);
        assert_eq!(config.metrics.path, "/metrics");
        assert_eq!(config.metrics.sample_interval().as_secs(), 1);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.shutdown_timeout().as_secs(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scrape_listener_disabled_by_port_zero() {
        let mut settings = MetricsSettings::default();
        assert!(settings.scrape_enabled());

        settings.port = 0;
        assert!(!settings.scrape_enabled());

        settings.port = 9090;
        settings.enabled = false;
        assert!(!settings.scrape_enabled());
    }

    #[test]
    fn test_telemetry_validation_rejects_bad_values() {
        let mut config = TelemetryConfig::default();
        config.tracing.sample_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.metrics.path = "metrics".into();
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.logging.level = "loud".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("level"));

        let mut config = TelemetryConfig::default();
        config.tracing.endpoint = "jaeger:4317".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_hierarchy() {
        unsafe {
            std::env::set_var("APP_TELEMETRY__METRICS__PORT", "9191");
        }

        let default = r#"[telemetry.metrics]
        port = 8000"#;

        let env_specific = r#"[telemetry.metrics]
        port = 9000"#;

        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string(default))
            .merge(Toml::string(env_specific))
            .merge(Env::prefixed("APP_").split("__"))
            .extract()
            .expect("Should merge configs");

        assert_eq!(config.telemetry.metrics.port, 9191);

        unsafe {
            std::env::remove_var("APP_TELEMETRY__METRICS__PORT");
        }
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 7000\n\n[telemetry.tracing]\nexporter = \"none\""
        )
        .unwrap();

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            port: Some(7100),
            environment: Some("testing".into()),
            metrics_port: Some(0),
            debug: true,
            ..Cli::default()
        };

        let config = load_config_from(&cli).expect("Should load config");
        assert_eq!(config.server.port, 7100);
        assert_eq!(config.telemetry.environment, Environment::Testing);
        assert_eq!(config.telemetry.tracing.exporter, TraceExporterKind::None);
        assert_eq!(config.telemetry.metrics.port, 0);
        assert_eq!(config.telemetry.logging.level, "debug");
        assert_eq!(
            config.catalog.seed_file.as_deref(),
            Some(std::path::Path::new("config/products.json"))
        );
    }

    #[test]
    fn test_validation_catches_invalid_bind() {
        let config_toml = r#"
            [server]
            port = 8080
            bind = "invalid-ip-address"
        "#;

        let config: AppConfig = Figment::new()
            .merge(Toml::string(config_toml))
            .extract()
            .expect("Should parse");

        let validation = config.validate();
        assert!(validation.is_err());
        assert!(validation.unwrap_err().to_string().contains("bind"));
    }
}
