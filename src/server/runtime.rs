use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::health::health_handler;
use crate::middleware::{request_id_middleware, telemetry_middleware};
use crate::observability::TelemetryHandle;
use crate::products::{get_product, InMemoryProductRepository, TracedProductRepository};

use super::AppState;

/// Start the HTTP server and serve until SIGINT/SIGTERM.
///
/// In-flight requests get `server.shutdown_timeout` seconds to drain once the
/// signal arrives.
pub async fn start_server(config: AppConfig, telemetry: TelemetryHandle) -> Result<()> {
    info!(
        "Starting {} on {}:{}",
        config.telemetry.service_name, config.server.bind, config.server.port
    );

    let store = match &config.catalog.seed_file {
        Some(path) => {
            let store = InMemoryProductRepository::from_seed_file(path)?;
            info!("Loaded product catalog from {}", path.display());
            store
        }
        None => InMemoryProductRepository::new(),
    };
    let products = TracedProductRepository::new(store, telemetry.clone());
    let state = AppState::new(config.telemetry.service_name.clone(), Arc::new(products));
    let app = build_router(state, telemetry);

    let bind_addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}. Is another process using this port?", bind_addr, e))?;
    info!("Server successfully bound to {}", bind_addr);

    serve(
        listener,
        app,
        shutdown_signal(),
        Duration::from_secs(config.server.shutdown_timeout),
    )
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Build the application router.
///
/// Layers, outermost first: panic recovery, request id, telemetry, CORS.
/// Panic recovery sits outside the telemetry middleware so a panicking
/// handler is still recorded (as a 500) before the client gets its response.
pub fn build_router(state: AppState, telemetry: TelemetryHandle) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/products/{id}", get(get_product))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(from_fn_with_state(telemetry, telemetry_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(CatchPanicLayer::new())
}

/// Serve `app` on `listener` until `shutdown` resolves, then give in-flight
/// requests at most `drain_timeout` to finish.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    shutdown: F,
    drain_timeout: Duration,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        let _ = signalled_tx.send(());
    })
    .into_future();

    let drain_deadline = async move {
        if signalled_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(drain_timeout).await;
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => {
            warn!(timeout = ?drain_timeout, "Graceful shutdown timed out; dropping in-flight requests");
        }
    }

    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
