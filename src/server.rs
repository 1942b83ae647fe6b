//! HTTP server for exposing Prometheus metrics.
//!
//! This module provides an Axum-based HTTP server that serves the `/metrics`
//! endpoint for Prometheus scraping and a `/health` endpoint for health checks.
//! Scrapes only read the last published snapshot; they never trigger restic.

use crate::error::{ExporterError, Result};
use crate::metrics::ExporterMetrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    metrics: Arc<ExporterMetrics>,
}

impl AppState {
    pub fn new(metrics: Arc<ExporterMetrics>) -> Self {
        Self { metrics }
    }
}

/// Routes of the exporter.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
///
/// # Arguments
///
/// * `listen_address` - Address to bind to (e.g., "0.0.0.0:8001")
/// * `state` - Registry with the repository and exporter metrics
pub async fn start_server(listen_address: &str, state: AppState) -> Result<()> {
    info!("Starting HTTP server on {}", listen_address);

    let listener = TcpListener::bind(listen_address).await?;
    info!("Serving at http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .await
        .map_err(|e| ExporterError::Server(e.to_string()))?;

    Ok(())
}

/// Handler for /metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    debug!("Incoming request");

    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Handler for /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "OK").into_response()
}

/// Handler for root endpoint.
async fn root_handler() -> Response {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>Restic Exporter</title></head>
<body>
    <h1>Restic Exporter</h1>
    <p>Prometheus metrics exporter for restic backup repositories</p>
    <ul>
        <li><a href="/metrics">/metrics</a> - Prometheus metrics</li>
        <li><a href="/health">/health</a> - Health check</li>
    </ul>
</body>
</html>
"#,
    )
    .into_response()
}
