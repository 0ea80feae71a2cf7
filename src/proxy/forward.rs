//! Plain HTTP forwarding through a pooled client.

use axum::body::Body;
use axum::response::IntoResponse;
use hyper::header::{HeaderMap, CONNECTION};
use hyper::{Request, Response, StatusCode};

use crate::observability::metrics;
use crate::pool::{ClientPool, OutboundClient};

/// Headers that describe a single hop and are never relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Replay `request` against the origin named in its URI and relay the answer.
///
/// The borrowed client goes back to the pool before this returns, whether the
/// exchange succeeded or not. Failures become a 500 carrying the error text.
pub async fn forward(pool: &ClientPool<OutboundClient>, request: Request<Body>) -> Response<Body> {
    let uri = request.uri().clone();
    if uri.host().is_none() {
        tracing::warn!(uri = %uri, "Request URI is not absolute");
        return (StatusCode::BAD_REQUEST, "Request URI must be absolute").into_response();
    }

    let (mut parts, body) = request.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    let request = Request::from_parts(parts, body);

    let client = pool.acquire();
    let result = client.send(request).await;
    drop(client);

    match result {
        Ok(response) => {
            tracing::debug!(uri = %uri, status = %response.status(), "Forwarded request");
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(uri = %uri, error = %e, "Failed to process HTTP request");
            metrics::record_upstream_error("forward");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to process request: {}", e),
            )
                .into_response()
        }
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP.iter().copied()) {
        headers.remove(name);
    }
}
