//! Request dispatch and tunneling engine.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → dispatch (count, classify by method)
//!         ├─ any method  → forward.rs (pooled client → origin → response)
//!         └─ CONNECT     → tunnel.rs (dial → 200 → upgrade)
//!                              → relay.rs (two copy tasks, joined on both)
//! ```
//!
//! # Design Decisions
//! - The proxy owns its client pool; nothing here is process-global
//! - Every failure is turned into a status code or a log line at the point it happens
//! - `Handler` is the seam between classification and the two I/O paths

pub mod forward;
pub mod relay;
pub mod tunnel;

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use hyper::{Method, Request, Response};

use crate::config::ProxyConfig;
use crate::net::ConnectionTracker;
use crate::observability::metrics;
use crate::pool::{ClientPool, OutboundClient};

pub use relay::{relay, RelayStats};
pub use tunnel::TunnelSettings;

/// The two ways a request can be served.
pub trait Handler: Send + Sync {
    /// Replay a plain request against its origin.
    fn forward(&self, request: Request<Body>) -> impl Future<Output = Response<Body>> + Send;

    /// Open a raw tunnel for a CONNECT request.
    fn tunnel(&self, request: Request<Body>) -> impl Future<Output = Response<Body>> + Send;
}

/// Count the request, then send CONNECT to the tunnel path and everything else to forwarding.
pub async fn dispatch<H: Handler>(handler: &H, request: Request<Body>) -> Response<Body> {
    metrics::record_request(request.method());

    if request.method() == Method::CONNECT {
        handler.tunnel(request).await
    } else {
        handler.forward(request).await
    }
}

/// The production handler: pooled forwarding plus raw TCP tunnels.
#[derive(Debug)]
pub struct Proxy {
    pool: Arc<ClientPool<OutboundClient>>,
    tunnels: TunnelSettings,
    tracker: ConnectionTracker,
}

impl Proxy {
    pub fn new(config: &ProxyConfig, tracker: ConnectionTracker) -> Self {
        let outbound = config.outbound();
        let pool = ClientPool::new(config.pool_max_idle, move || OutboundClient::new(&outbound));

        Self {
            pool: Arc::new(pool),
            tunnels: TunnelSettings {
                connect_timeout: outbound.write_timeout,
                idle_timeout: config.tunnel_idle_timeout(),
            },
            tracker,
        }
    }

    pub fn pool(&self) -> &ClientPool<OutboundClient> {
        &self.pool
    }
}

impl Handler for Proxy {
    async fn forward(&self, request: Request<Body>) -> Response<Body> {
        forward::forward(&self.pool, request).await
    }

    async fn tunnel(&self, request: Request<Body>) -> Response<Body> {
        tunnel::establish(request, &self.tunnels, &self.tracker).await
    }
}
