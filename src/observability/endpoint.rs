//! Prometheus scrape endpoint
//!
//! Runs on its own listener, separate from the API router, so scrapes keep
//! working independently of application traffic. Bind failures are returned
//! to the caller; errors after a successful bind are only logged.

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TelemetryError;

use super::recorder::MetricsRegistry;

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Router serving the registry at `path`.
pub fn metrics_router(path: &str, registry: MetricsRegistry) -> Router {
    Router::new()
        .route(path, get(metrics_endpoint))
        .with_state(registry)
}

/// Render the registry in the Prometheus text format.
pub async fn metrics_endpoint(State(registry): State<MetricsRegistry>) -> Response {
    let metrics_content = registry.render();

    tracing::debug!(metrics_size = %metrics_content.len(), "Metrics served successfully");

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        metrics_content,
    )
        .into_response()
}

/// A running scrape listener.
pub struct MetricsServer {
    local_addr: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MetricsServer {
    pub async fn bind(
        addr: SocketAddr,
        path: &str,
        registry: MetricsRegistry,
        token: CancellationToken,
    ) -> Result<Self, TelemetryError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TelemetryError::MetricsListener { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TelemetryError::MetricsListener { addr, source })?;

        let app = metrics_router(path, registry);
        let shutdown = token.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Metrics server failed");
            }
        });

        tracing::info!(addr = %local_addr, "Prometheus metrics endpoint listening");

        Ok(Self {
            local_addr,
            token,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting scrapes and wait for the listener to close.
    pub async fn shutdown(self) -> Result<(), TelemetryError> {
        self.token.cancel();
        self.task.await.map_err(|e| TelemetryError::Task {
            stage: "metrics listener".to_string(),
            message: e.to_string(),
        })
    }
}
