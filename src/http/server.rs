//! HTTP server: accept loop, per-connection serving, graceful shutdown.
//!
//! # Responsibilities
//! - Run one task per admitted connection
//! - Serve HTTP/1.1 with upgrades enabled so CONNECT can take over the socket
//! - Close a connection after `max_requests_per_conn` requests
//! - On shutdown: stop accepting, ask connections to finish, wait out the grace period

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONNECTION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::net::{ConnectionPermit, ConnectionTracker, Listener, TrackedKind};
use crate::proxy::{dispatch, Proxy};

/// Pause after a failed accept (e.g. out of file descriptors) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP server for the forward proxy.
pub struct HttpServer {
    proxy: Arc<Proxy>,
    tracker: ConnectionTracker,
    max_requests_per_conn: usize,
    shutdown_grace: Duration,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &ProxyConfig) -> Self {
        let tracker = ConnectionTracker::new();
        let proxy = Arc::new(Proxy::new(config, tracker.clone()));

        Self {
            proxy,
            tracker,
            max_requests_per_conn: config.max_requests_per_conn,
            shutdown_grace: config.shutdown_grace(),
        }
    }

    /// Serve connections from `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => self.spawn_connection(stream, peer_addr, permit),
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }
        drop(listener);

        self.tracker.begin_drain();
        if self.tracker.wait_for_drain(self.shutdown_grace).await {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                grace_secs = self.shutdown_grace.as_secs(),
                "Shutdown grace period elapsed with connections still open"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer_addr: SocketAddr, permit: ConnectionPermit) {
        let guard = self.tracker.track(TrackedKind::Connection);
        let span = tracing::debug_span!("connection", connection_id = %guard.id(), peer_addr = %peer_addr);
        let connection = Connection {
            proxy: Arc::clone(&self.proxy),
            permit: Arc::new(permit),
            max_requests: self.max_requests_per_conn,
            drain: self.tracker.clone(),
        };

        tokio::spawn(
            async move {
                let _guard = guard;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                connection.serve(stream).await;
            }
            .instrument(span),
        );
    }
}

/// Everything one inbound connection needs.
struct Connection {
    proxy: Arc<Proxy>,
    /// Shared with any tunnel opened on this connection, so the per-IP slot
    /// stays taken until the socket really closes.
    permit: Arc<ConnectionPermit>,
    max_requests: usize,
    drain: ConnectionTracker,
}

impl Connection {
    async fn serve(self, stream: TcpStream) {
        let Connection {
            proxy,
            permit,
            max_requests,
            drain,
        } = self;
        let served = AtomicUsize::new(0);

        let service = service_fn(move |mut request: Request<Incoming>| {
            let proxy = Arc::clone(&proxy);
            let count = served.fetch_add(1, Ordering::Relaxed) + 1;
            request.extensions_mut().insert(Arc::clone(&permit));

            async move {
                let is_connect = request.method() == Method::CONNECT;
                let mut response = dispatch(&*proxy, request.map(Body::new)).await;

                // A successful CONNECT hands the socket to the tunnel instead.
                let upgrading = is_connect && response.status().is_success();
                if count >= max_requests && !upgrading {
                    response
                        .headers_mut()
                        .insert(CONNECTION, HeaderValue::from_static("close"));
                }
                Ok::<_, Infallible>(response)
            }
        });

        let conn = http1::Builder::new()
            .preserve_header_case(true)
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades();
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "Connection ended with error");
                }
            }
            _ = drain_requested(drain.drain_signal()) => {
                conn.as_mut().graceful_shutdown();
                if let Err(e) = conn.await {
                    tracing::debug!(error = %e, "Connection ended with error during drain");
                }
            }
        }
    }
}

/// Resolves once shutdown asks connections to drain.
async fn drain_requested(mut signal: watch::Receiver<bool>) {
    let requested = signal.wait_for(|draining| *draining).await.is_ok();
    if !requested {
        // Tracker gone: nothing will ever ask for a drain.
        std::future::pending::<()>().await;
    }
}
