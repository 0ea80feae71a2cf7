//! Startup orchestration.
//!
//! # Responsibilities
//! - Install the metrics exporter
//! - Build the proxy (and its client pool) from the validated config
//! - Bind the listener and serve until a termination signal arrives
//!
//! # Design Decisions
//! - Any startup error is fatal and returned to `main`, including failing to install signal handlers
//! - Subsystems initialize in order, not concurrently

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;

use crate::config::ProxyConfig;
use crate::http::HttpServer;
use crate::lifecycle::signals::Termination;
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid metrics address {address:?}: {source}")]
    MetricsAddress {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] BuildError),

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Run the proxy until SIGINT/SIGTERM, then shut down gracefully.
pub async fn run(config: Arc<ProxyConfig>) -> Result<(), StartupError> {
    if config.metrics_enabled {
        let addr: SocketAddr = config.metrics_address.parse().map_err(|source| {
            StartupError::MetricsAddress {
                address: config.metrics_address.clone(),
                source,
            }
        })?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(&config);
    let listener = Listener::bind(&config.listen_address(), config.max_connections).await?;

    let mut termination = Termination::register().map_err(StartupError::Signals)?;
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let signal = termination.recv().await;
        tracing::info!(signal, "Termination signal received");
        shutdown.trigger();
    });

    tracing::info!(
        address = %config.server_address,
        max_connections_per_ip = config.max_connections,
        max_requests_per_conn = config.max_requests_per_conn,
        "Starting proxy server"
    );
    server.run(listener, server_shutdown).await?;
    Ok(())
}
