//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): dispatched requests by method
//! - `proxy_upstream_errors_total` (counter): failed forwards and dials by kind
//! - `proxy_active_connections` (gauge): open inbound connections
//! - `proxy_active_tunnels` (gauge): open CONNECT tunnels
//! - `proxy_tunnel_bytes_total` (counter): relayed bytes by direction

use std::net::SocketAddr;

use hyper::Method;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

fn describe() {
    describe_counter!("proxy_requests_total", "Requests dispatched by the proxy");
    describe_counter!("proxy_upstream_errors_total", "Failed outbound exchanges and dials");
    describe_gauge!("proxy_active_connections", "Open inbound connections");
    describe_gauge!("proxy_active_tunnels", "Open CONNECT tunnels");
    describe_counter!("proxy_tunnel_bytes_total", "Bytes relayed through tunnels");
}

/// Count one dispatched request.
pub fn record_request(method: &Method) {
    counter!("proxy_requests_total", "method" => method_label(method)).increment(1);
}

/// Count one failed outbound exchange (`forward`), stalled origin body (`body_stalled`) or dial (`connect`).
pub fn record_upstream_error(kind: &'static str) {
    counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn connection_opened() {
    gauge!("proxy_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("proxy_active_connections").decrement(1.0);
}

pub fn tunnel_opened() {
    gauge!("proxy_active_tunnels").increment(1.0);
}

pub fn tunnel_closed() {
    gauge!("proxy_active_tunnels").decrement(1.0);
}

pub fn record_tunnel_bytes(direction: &'static str, bytes: u64) {
    counter!("proxy_tunnel_bytes_total", "direction" => direction).increment(bytes);
}

/// Clients choose the method string; keep label cardinality bounded.
fn method_label(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        Method::CONNECT => "CONNECT",
        Method::PATCH => "PATCH",
        Method::TRACE => "TRACE",
        _ => "OTHER",
    }
}
