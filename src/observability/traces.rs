//! Trace export backends and context propagation
//!
//! The exporter is picked from configuration through [`backend_for`]; every
//! backend produces an SDK [`TracerProvider`] that the telemetry handle owns.
//! A disabled backend still hands out a provider so spans keep satisfying the
//! API, but nothing is ever sampled or exported.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::http::HeaderMap;
use opentelemetry::propagation::{Extractor, TextMapCompositePropagator};
use opentelemetry::trace::TraceError;
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{Config, Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};

use crate::config::{TelemetryConfig, TraceExporterKind, TracingSettings};
use crate::error::TelemetryError;

/// Instrumentation scope of every span this crate starts.
pub const INSTRUMENTATION_NAME: &str = "product-service";

/// A span export backend.
pub trait TraceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build a provider stamped with `resource`.
    fn install(&self, resource: Resource) -> Result<TracerProvider, TelemetryError>;

    /// Flush what is buffered and release the provider. Blocking.
    fn shutdown(&self, provider: TracerProvider) -> Result<(), TelemetryError> {
        flush_provider(provider)
    }
}

/// Spans are created but never sampled, so nothing leaves the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl TraceBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn install(&self, resource: Resource) -> Result<TracerProvider, TelemetryError> {
        Ok(TracerProvider::builder()
            .with_config(
                Config::default()
                    .with_sampler(Sampler::AlwaysOff)
                    .with_resource(resource),
            )
            .build())
    }
}

/// Batched OTLP/gRPC export to a collector.
#[derive(Debug, Clone)]
pub struct OtlpBackend {
    pub endpoint: String,
    pub sample_ratio: f64,
    pub export_timeout: Duration,
}

impl OtlpBackend {
    pub fn from_settings(settings: &TracingSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            sample_ratio: settings.sample_ratio,
            export_timeout: settings.export_timeout(),
        }
    }
}

impl TraceBackend for OtlpBackend {
    fn name(&self) -> &'static str {
        "otlp"
    }

    fn install(&self, resource: Resource) -> Result<TracerProvider, TelemetryError> {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(&self.endpoint)
            .with_timeout(self.export_timeout)
            .build_span_exporter()
            .map_err(|source| TelemetryError::TraceExporter {
                backend: self.name(),
                source,
            })?;

        let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(self.sample_ratio)));

        Ok(TracerProvider::builder()
            .with_config(
                Config::default()
                    .with_sampler(sampler)
                    .with_resource(resource),
            )
            .with_batch_exporter(exporter, runtime::Tokio)
            .build())
    }
}

/// Select the backend configured for this process.
pub fn backend_for(settings: &TracingSettings) -> Arc<dyn TraceBackend> {
    if !settings.enabled {
        return Arc::new(NoopBackend);
    }
    match settings.exporter {
        TraceExporterKind::None => Arc::new(NoopBackend),
        TraceExporterKind::Otlp => Arc::new(OtlpBackend::from_settings(settings)),
    }
}

/// Flush buffered spans, then drop the provider.
pub fn flush_provider(provider: TracerProvider) -> Result<(), TelemetryError> {
    let failures: Vec<TraceError> = provider
        .force_flush()
        .into_iter()
        .filter_map(Result::err)
        .collect();
    drop(provider);

    if failures.is_empty() {
        Ok(())
    } else {
        let message = failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(TelemetryError::TraceFlush(message))
    }
}

/// Resource attributes identifying this service on every exported span.
pub fn service_resource(config: &TelemetryConfig) -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", config.service_version.clone()),
        KeyValue::new("environment", config.environment.as_str()),
        KeyValue::new("telemetry.sdk.name", "opentelemetry"),
        KeyValue::new("telemetry.sdk.language", "rust"),
    ])
}

static PROPAGATOR: OnceLock<()> = OnceLock::new();

/// Install the W3C trace-context + baggage propagator process-wide.
///
/// Returns `true` only for the call that performed the installation.
pub fn install_propagator() -> bool {
    let mut installed = false;
    PROPAGATOR.get_or_init(|| {
        let propagator = TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]);
        global::set_text_map_propagator(propagator);
        installed = true;
    });
    installed
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Parent context carried by inbound request headers.
pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}
