//! Telemetry bootstrap
//!
//! [`setup`] brings up, in order, the propagator, the tracer provider, the
//! metrics registry (with its scrape listener and runtime sampler) and the
//! log pipeline. Each started stage registers its release action on a
//! [`ShutdownStack`]; if a later stage fails the earlier ones are released in
//! reverse order before the error is returned.

use std::borrow::Cow;
use std::io::IsTerminal;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::Tracer;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::{MetricsSettings, TelemetryConfig};
use crate::error::TelemetryError;

use super::endpoint::MetricsServer;
use super::logging::{build_dispatch, CorrelatedLogger};
use super::recorder::MetricsRegistry;
use super::sampler::RuntimeSampler;
use super::shutdown::{ShutdownFn, ShutdownStack};
use super::traces::{
    backend_for, install_propagator, service_resource, NoopBackend, TraceBackend,
    INSTRUMENTATION_NAME,
};

/// Bootstrap telemetry for the process from configuration.
///
/// The log pipeline becomes the global default subscriber and the metrics
/// registry the global `metrics` recorder.
pub async fn setup(config: &TelemetryConfig) -> Result<TelemetryHandle, TelemetryError> {
    TelemetryBuilder::new(config.clone())
        .global(true)
        .build()
        .await
}

/// Bootstrap with injectable pieces. Tests build isolated handles this way.
pub struct TelemetryBuilder {
    config: TelemetryConfig,
    backend: Option<Arc<dyn TraceBackend>>,
    log_writer: Option<BoxMakeWriter>,
    global: bool,
}

impl TelemetryBuilder {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            backend: None,
            log_writer: None,
            global: false,
        }
    }

    /// Use `backend` instead of the one selected by configuration.
    pub fn with_trace_backend(mut self, backend: Arc<dyn TraceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Send log output to `writer` instead of stdout.
    pub fn with_log_writer(mut self, writer: BoxMakeWriter) -> Self {
        self.log_writer = Some(writer);
        self
    }

    /// Install the log dispatch and metrics recorder process-wide.
    pub fn global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    pub async fn build(self) -> Result<TelemetryHandle, TelemetryError> {
        let TelemetryBuilder {
            config,
            backend,
            log_writer,
            global,
        } = self;
        let stack = ShutdownStack::new(config.shutdown_timeout());
        let token = CancellationToken::new();

        // (a) propagator
        if install_propagator() {
            tracing::debug!("W3C trace-context and baggage propagator installed");
        }

        // (b) tracer provider
        let backend = backend.unwrap_or_else(|| backend_for(&config.tracing));
        let provider = backend.install(service_resource(&config))?;
        let tracer = provider.tracer(INSTRUMENTATION_NAME);
        let tracing_enabled = backend.name() != NoopBackend.name();
        {
            let backend = backend.clone();
            stack.push(ShutdownFn::blocking("tracer provider", move || {
                backend.shutdown(provider)
            }));
        }

        // (c) metrics
        let metrics = match start_metrics(&config, global, &stack, &token).await {
            Ok(started) => started,
            Err(e) => {
                stack.rollback().await;
                return Err(e);
            }
        };

        // (d) logging
        let ansi = log_writer.is_none() && std::io::stdout().is_terminal();
        let writer = log_writer.unwrap_or_else(|| BoxMakeWriter::new(std::io::stdout));
        let dispatch = match build_dispatch(&config.logging, writer, ansi) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                stack.rollback().await;
                return Err(e);
            }
        };
        if global && tracing::dispatcher::set_global_default(dispatch.clone()).is_err() {
            tracing::warn!("A global tracing subscriber is already set; keeping it");
        }

        let (registry, scrape_addr) = metrics;
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(
                service = %config.service_name,
                version = %config.service_version,
                environment = %config.environment,
                trace_backend = %backend.name(),
                metrics_enabled = %config.metrics.enabled,
                scrape_addr = ?scrape_addr,
                "Telemetry initialized"
            );
        });

        Ok(TelemetryHandle {
            inner: Arc::new(TelemetryInner {
                tracer,
                tracing_enabled,
                metrics: registry,
                logger: CorrelatedLogger::new(dispatch),
                scrape_addr,
                token,
                shutdown: stack,
            }),
        })
    }
}

async fn start_metrics(
    config: &TelemetryConfig,
    global: bool,
    stack: &ShutdownStack,
    token: &CancellationToken,
) -> Result<(MetricsRegistry, Option<SocketAddr>), TelemetryError> {
    let registry = MetricsRegistry::new(config)?;

    if global {
        if let Err(e) = registry.install_global() {
            tracing::warn!(error = %e, "Keeping the existing global metrics recorder");
        }
    }

    let mut scrape_addr = None;
    if config.metrics.scrape_enabled() {
        let addr = scrape_socket_addr(&config.metrics)?;
        let server = MetricsServer::bind(
            addr,
            &config.metrics.path,
            registry.clone(),
            token.child_token(),
        )
        .await?;
        scrape_addr = Some(server.local_addr());
        stack.push(ShutdownFn::new("metrics listener", move || server.shutdown()));
    }

    if config.metrics.enabled {
        let sampler = RuntimeSampler::spawn(
            registry.clone(),
            config.metrics.sample_interval(),
            token.child_token(),
        );
        stack.push(ShutdownFn::new("runtime sampler", move || sampler.stop()));
    }

    Ok((registry, scrape_addr))
}

fn scrape_socket_addr(settings: &MetricsSettings) -> Result<SocketAddr, TelemetryError> {
    if !settings.path.starts_with('/') {
        return Err(TelemetryError::Config(format!(
            "metrics path must start with '/': {}",
            settings.path
        )));
    }
    let ip: IpAddr = settings
        .bind
        .parse()
        .map_err(|_| TelemetryError::Config(format!("invalid metrics bind address: {}", settings.bind)))?;
    Ok(SocketAddr::new(ip, settings.port))
}

/// Shared access to the running telemetry subsystems.
#[derive(Clone)]
pub struct TelemetryHandle {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    tracer: Tracer,
    tracing_enabled: bool,
    metrics: MetricsRegistry,
    logger: CorrelatedLogger,
    scrape_addr: Option<SocketAddr>,
    token: CancellationToken,
    shutdown: ShutdownStack,
}

impl Drop for TelemetryInner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl TelemetryHandle {
    /// Whether spans leave the process.
    pub fn tracing_enabled(&self) -> bool {
        self.inner.tracing_enabled
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.inner.metrics
    }

    pub fn logger(&self) -> &CorrelatedLogger {
        &self.inner.logger
    }

    /// Address of the scrape listener, when one is running.
    pub fn scrape_addr(&self) -> Option<SocketAddr> {
        self.inner.scrape_addr
    }

    /// Start a span under `parent` and return the context that carries it.
    pub fn start_span(
        &self,
        parent: &Context,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> Context {
        let tracer = &self.inner.tracer;
        let span = tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(tracer, parent);
        parent.with_span(span)
    }

    /// Release every subsystem, bounded by the configured timeout.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub async fn shutdown(&self) -> Result<(), TelemetryError> {
        let result = self.inner.shutdown.shutdown().await;
        self.inner.token.cancel();
        result
    }
}
