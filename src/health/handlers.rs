use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::server::response::{respond, ApiResponse};
use crate::server::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub hostname: String,
}

/// Liveness check at /health
///
/// Reports the responding host so replicas behind a load balancer can be
/// told apart.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    debug!("Health check requested");

    let body = HealthStatus {
        status: "ok".to_string(),
        service: state.service_name.to_string(),
        hostname: hostname(),
    };

    respond(StatusCode::OK, ApiResponse::success(StatusCode::OK, body))
}

/// Host name from `HOSTNAME`, then the kernel, else "unknown".
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/proc/sys/kernel/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
