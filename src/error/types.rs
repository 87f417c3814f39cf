use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use opentelemetry::trace::TraceError;
use thiserror::Error;
use uuid::Uuid;

use crate::server::response::{respond, ApiResponse};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        respond(status, ApiResponse::<()>::error(status, vec![self.to_string()]))
    }
}

/// Failures of the product store, surfaced through the repository seam.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("product {0} not found")]
    NotFound(Uuid),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(_) => AppError::NotFound(err.to_string()),
        }
    }
}

/// Errors raised while bootstrapping or tearing down telemetry.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid telemetry configuration: {0}")]
    Config(String),

    #[error("Failed to build {backend} trace exporter: {source}")]
    TraceExporter {
        backend: &'static str,
        #[source]
        source: TraceError,
    },

    #[error("Failed to flush spans: {0}")]
    TraceFlush(String),

    #[error("Failed to build metrics registry: {0}")]
    MetricsRegistry(String),

    #[error("A global metrics recorder is already installed")]
    RecorderAlreadyInstalled,

    #[error("Failed to bind metrics listener on {addr}: {source}")]
    MetricsListener {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid log level: {0}")]
    LogLevel(String),

    #[error("{stage} task failed: {message}")]
    Task { stage: String, message: String },

    #[error("{stage} did not shut down within {timeout:?}")]
    ShutdownTimeout { stage: String, timeout: Duration },

    #[error("Telemetry shutdown failed: {0}")]
    Shutdown(ShutdownErrors),
}

/// One stage that failed to release its resources.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: String,
    pub error: TelemetryError,
}

/// Every failure collected during an aggregate shutdown, in the order the
/// stages ran.
#[derive(Debug, Default)]
pub struct ShutdownErrors(pub Vec<StageFailure>);

impl ShutdownErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, stage: impl Into<String>, error: TelemetryError) {
        self.0.push(StageFailure {
            stage: stage.into(),
            error,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageFailure> {
        self.0.iter()
    }

    pub fn into_result(self) -> Result<(), TelemetryError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(TelemetryError::Shutdown(self))
        }
    }
}

impl fmt::Display for ShutdownErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.stage, failure.error)?;
        }
        Ok(())
    }
}
