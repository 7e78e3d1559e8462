//! EventGate - event ingestion gateway
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! EVENTGATE_CLIENTS=acme cargo run
//!
//! # Run with debug output and JSON logs
//! EVENTGATE_LOG_LEVEL=debug EVENTGATE_LOG_FORMAT=json cargo run
//! ```
//!
//! ## Environment Variables
//!
//! - `EVENTGATE_METRICS_ADDR`: Metrics/health server address (default: "0.0.0.0:9090")
//! - `EVENTGATE_CLIENTS`: Comma-separated clients, `id` or `id=requests/seconds`
//! - `EVENTGATE_QUEUE_JOURNAL`: Path of the queue journal (default: in-memory queue)
//! - `EVENTGATE_LOG_LEVEL`: Log filter (default: "info")
//!
//! See [`eventgate_gateway::config`] for the full list.

use eventgate_gateway::config::{Config, LogFormat};
use eventgate_gateway::metrics::Metrics;
use eventgate_gateway::metrics_server::MetricsServer;
use eventgate_gateway::pipeline::Pipeline;
use eventgate_gateway::sink::StdoutSink;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!(
        metrics_addr = %config.metrics_addr,
        clients = config.clients.len(),
        workers = config.worker_count,
        batch_size = config.event_batch_size,
        retention_days = config.event_retention_days,
        "Starting EventGate"
    );

    Metrics::init()?;

    let metrics_addr = config.metrics_addr;

    // Stdout sink for local runs; deployments plug in their own StorageSink
    let handle = Pipeline::new(config).sink(StdoutSink::pretty()).start()?;

    let metrics_handle = MetricsServer::start(metrics_addr, Arc::clone(handle.gateway()));

    shutdown_signal().await;

    handle.shutdown().await?;
    metrics_handle.abort();

    info!("EventGate shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
