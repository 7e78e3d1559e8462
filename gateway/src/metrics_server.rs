//! HTTP server for metrics, health and snapshot endpoints
//!
//! Runs a lightweight HTTP server on a separate port for Prometheus scraping
//! and load balancer checks.
//!
//! # Example
//!
//! ```ignore
//! use eventgate_gateway::metrics_server::MetricsServer;
//!
//! let metrics_handle = MetricsServer::start(config.metrics_addr, Arc::clone(handle.gateway()));
//!
//! // Later, to shutdown
//! metrics_handle.abort();
//! ```

use crate::gateway::Gateway;
use axum::extract::State;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Metrics HTTP server
pub struct MetricsServer;

impl MetricsServer {
    /// Start the server on the given address
    ///
    /// Returns a JoinHandle that can be used to abort the server.
    pub fn start(addr: SocketAddr, gateway: Arc<Gateway>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let app = router(gateway);

            info!(%addr, "Metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, %addr, "Failed to bind metrics server");
                    return;
                }
            };

            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }
}

/// Routes served by [`MetricsServer`]
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/snapshot", get(snapshot_handler))
        .with_state(gateway)
}

/// Handler for /metrics endpoint
async fn metrics_handler() -> impl IntoResponse {
    let body = crate::metrics::gather();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Handler for /health endpoint; 503 when a backing component is unreachable
async fn health_handler(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    let report = gateway.health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn snapshot_handler(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.metrics_snapshot())
}
