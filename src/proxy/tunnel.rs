//! CONNECT tunnel establishment.
//!
//! The destination is dialed before the client is answered, so a failed dial
//! is reported as a 503 and no relay is ever started. On success the 200 goes
//! out with no body, hyper hands back the raw client connection, and the
//! relay takes over.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::IntoResponse;
use hyper::header::HOST;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::net::{ConnectionPermit, ConnectionTracker, TrackedKind};
use crate::observability::metrics;
use crate::proxy::relay::relay;

/// Timeouts applied to every tunnel.
#[derive(Debug, Clone, Copy)]
pub struct TunnelSettings {
    /// Deadline for dialing the destination.
    pub connect_timeout: Duration,
    /// A tunnel silent in both directions for this long is closed.
    pub idle_timeout: Duration,
}

/// Dial the CONNECT target and, on success, start relaying in the background.
pub async fn establish(
    mut request: Request<Body>,
    settings: &TunnelSettings,
    tracker: &ConnectionTracker,
) -> Response<Body> {
    let Some(target) = connect_target(&request) else {
        tracing::warn!(uri = %request.uri(), "CONNECT without a host:port target");
        return (StatusCode::BAD_REQUEST, "CONNECT requires a host:port target").into_response();
    };

    let destination = match dial(&target, settings.connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(host = %target, error = %e, "Failed to connect to destination for CONNECT");
            metrics::record_upstream_error("connect");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Failed to connect to destination: {}", e),
            )
                .into_response();
        }
    };

    let guard = tracker.track(TrackedKind::Tunnel);
    // The client socket now belongs to the tunnel, and so does its per-IP slot.
    let permit = request.extensions_mut().remove::<Arc<ConnectionPermit>>();
    let idle_timeout = settings.idle_timeout;
    let span = tracing::info_span!("tunnel", tunnel_id = %Uuid::new_v4(), host = %target);

    tokio::spawn(
        async move {
            let _guard = guard;
            let _permit = permit;
            // Resolves once the 200 below has been written and hyper releases the socket.
            match hyper::upgrade::on(request).await {
                Ok(upgraded) => {
                    tracing::debug!("Tunnel established");
                    let stats = relay(TokioIo::new(upgraded), destination, idle_timeout).await;
                    tracing::debug!(
                        client_to_destination = stats.client_to_destination,
                        destination_to_client = stats.destination_to_client,
                        "Tunnel closed"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "Client connection upgrade failed"),
            }
        }
        .instrument(span),
    );

    Response::new(Body::empty())
}

/// The `host:port` a CONNECT asks for: the authority-form URI, else the Host header.
pub fn connect_target<B>(request: &Request<B>) -> Option<String> {
    if let Some(authority) = request.uri().authority() {
        if authority.port().is_some() {
            return Some(authority.to_string());
        }
    }

    request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| has_port(host))
        .map(str::to_owned)
}

fn has_port(host: &str) -> bool {
    host.rsplit_once(':')
        .map(|(name, port)| !name.is_empty() && port.parse::<u16>().is_ok())
        .unwrap_or(false)
}

async fn dial(target: &str, timeout: Duration) -> std::io::Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(target))
        .await
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect timed out after {:?}", timeout),
            )
        })??;
    stream.set_nodelay(true)?;
    Ok(stream)
}
