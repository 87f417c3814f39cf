//! Prometheus-backed metrics registry
//!
//! Each [`MetricsRegistry`] owns an isolated Prometheus recorder carrying the
//! service-level labels (service, environment, version). Handles to the
//! instruments are atomics shared by every request; registration is
//! get-or-create so asking for the same series twice returns the same storage.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Request};
use axum::extract::ConnectInfo;
use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Label, Level, Metadata, Recorder, SharedString, Unit,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::config::TelemetryConfig;
use crate::error::TelemetryError;

use super::metrics::{
    describe_all, ACTIVE_REQUESTS, DEFAULT_BUCKETS, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION_SECONDS, LABEL_ENDPOINT, LABEL_METHOD, LABEL_STATUS,
    PROCESS_MEMORY_RESIDENT_BYTES,
};

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// The named instruments of one service, bound to a scrape-able registry.
#[derive(Clone)]
pub struct MetricsRegistry {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
    active_requests: Gauge,
    memory_resident: Gauge,
}

impl MetricsRegistry {
    pub fn new(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets(&DEFAULT_BUCKETS)
            .map_err(|e| TelemetryError::MetricsRegistry(e.to_string()))?
            .add_global_label("service", config.service_name.clone())
            .add_global_label("environment", config.environment.as_str())
            .add_global_label("version", config.service_version.clone())
            .build_recorder();

        describe_all(&recorder);

        let handle = recorder.handle();
        let active_requests = recorder.register_gauge(&Key::from_name(ACTIVE_REQUESTS), &METADATA);
        let memory_resident =
            recorder.register_gauge(&Key::from_name(PROCESS_MEMORY_RESIDENT_BYTES), &METADATA);

        tracing::debug!(
            service = %config.service_name,
            environment = %config.environment,
            "Prometheus metrics registry created"
        );

        Ok(Self {
            recorder: Arc::new(recorder),
            handle,
            active_requests,
            memory_resident,
        })
    }

    /// Request counter series for one method/endpoint/status triple.
    pub fn request_counter(&self, method: &str, endpoint: &str, status: u16) -> Counter {
        let key = request_key(HTTP_REQUESTS_TOTAL, method, endpoint, status);
        self.recorder.register_counter(&key, &METADATA)
    }

    /// Duration histogram series for one method/endpoint/status triple.
    pub fn request_duration(&self, method: &str, endpoint: &str, status: u16) -> Histogram {
        let key = request_key(HTTP_REQUEST_DURATION_SECONDS, method, endpoint, status);
        self.recorder.register_histogram(&key, &METADATA)
    }

    /// One count and one latency observation for a finished request.
    pub fn record_request(&self, method: &str, endpoint: &str, status: u16, elapsed: Duration) {
        self.request_counter(method, endpoint, status).increment(1);
        self.request_duration(method, endpoint, status)
            .record(elapsed.as_secs_f64());
    }

    pub fn request_started(&self) {
        self.active_requests.increment(1.0);
    }

    pub fn request_finished(&self) {
        self.active_requests.decrement(1.0);
    }

    pub fn set_memory_resident(&self, bytes: u64) {
        self.memory_resident.set(bytes as f64);
    }

    /// Current registry contents in the Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Make this registry the target of the `metrics` macros process-wide.
    ///
    /// Only the first installation in a process succeeds.
    pub fn install_global(&self) -> Result<(), TelemetryError> {
        metrics::set_global_recorder(SharedRecorder(self.recorder.clone()))
            .map_err(|_| TelemetryError::RecorderAlreadyInstalled)
    }
}

fn request_key(name: &'static str, method: &str, endpoint: &str, status: u16) -> Key {
    Key::from_parts(
        name,
        vec![
            Label::new(LABEL_METHOD, method.to_string()),
            Label::new(LABEL_ENDPOINT, endpoint.to_string()),
            Label::new(LABEL_STATUS, status.to_string()),
        ],
    )
}

/// Lets one Prometheus recorder back both a registry and the global
/// `metrics` facade.
struct SharedRecorder(Arc<PrometheusRecorder>);

impl Recorder for SharedRecorder {
    fn describe_counter(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.0.describe_counter(key, unit, description)
    }

    fn describe_gauge(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.0.describe_gauge(key, unit, description)
    }

    fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.0.describe_histogram(key, unit, description)
    }

    fn register_counter(&self, key: &Key, metadata: &Metadata<'_>) -> Counter {
        self.0.register_counter(key, metadata)
    }

    fn register_gauge(&self, key: &Key, metadata: &Metadata<'_>) -> Gauge {
        self.0.register_gauge(key, metadata)
    }

    fn register_histogram(&self, key: &Key, metadata: &Metadata<'_>) -> Histogram {
        self.0.register_histogram(key, metadata)
    }
}

/// Extract the client IP: connection address first, then proxy headers.
pub fn extract_client_ip<B>(request: &Request<B>) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    client_ip_from_headers(request.headers())
}

/// Extract client IP from forwarding headers
pub fn client_ip_from_headers(headers: &HeaderMap) -> String {
    // Try X-Forwarded-For first (most common proxy header)
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            // Take first IP in case of multiple
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    // Try X-Real-IP (Nginx proxy)
    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    "unknown".to_string()
}
