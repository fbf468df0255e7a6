//! Axum HTTP server: router, listener, graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::handler::ProxyHandler;
use crate::stats::ProxyStats;

/// Paths under this prefix are answered by the proxy itself, never forwarded.
pub const ADMIN_PREFIX: &str = "/__proxy";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub handler: ProxyHandler,
    pub stats: ProxyStats,
}

/// Assemble the router: admin routes plus a catch-all that fans out.
pub fn router(state: AppState, request_timeout: Duration, max_body_bytes: usize) -> Router {
    Router::new()
        .route(&format!("{ADMIN_PREFIX}/health"), get(handle_health))
        .route(&format!("{ADMIN_PREFIX}/stats"), get(handle_get_stats))
        .fallback(handle_proxy)
        .with_state(Arc::new(state))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
}

/// Build and run the HTTP server.
pub async fn run(config: &ProxyConfig, state: AppState) -> anyhow::Result<()> {
    let listen_addr = config.server.listen_address.clone();
    let app = router(
        state,
        config.server.request_timeout(),
        config.server.max_body_bytes,
    );

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "review-proxy listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("review-proxy shut down gracefully");
    Ok(())
}

/// Catch-all: every method and path outside the admin prefix.
async fn handle_proxy(State(state): State<Arc<AppState>>, request: Request) -> Response {
    state.handler.handle(request).await
}

/// GET /__proxy/stats — return current proxy statistics.
async fn handle_get_stats(State(state): State<Arc<AppState>>) -> Response {
    axum::Json(state.stats.snapshot()).into_response()
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
