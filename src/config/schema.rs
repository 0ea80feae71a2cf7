//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the TOML config file.
//! Every field has a default so an empty (or missing) file yields a working proxy.

use std::time::Duration;

use serde::Deserialize;

/// Root configuration for the forward proxy.
///
/// Built once at startup and shared read-only (behind an `Arc`) afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listen address. Go-style `:8080` binds all interfaces.
    pub server_address: String,

    /// Maximum concurrent connections from a single client IP.
    pub max_connections: usize,

    /// Maximum requests served on one inbound connection before it is closed.
    pub max_requests_per_conn: usize,

    /// Log level (debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Outbound read timeout in seconds.
    pub client_read_timeout_secs: u64,

    /// Outbound write timeout in seconds. Also bounds outbound dials.
    pub client_write_timeout_secs: u64,

    /// How long an idle outbound keep-alive connection is kept, in seconds.
    pub client_max_idle_conn_duration_secs: u64,

    /// Maximum number of idle outbound clients retained by the pool.
    pub pool_max_idle: usize,

    /// A tunnel with no traffic in either direction for this long is closed.
    pub tunnel_idle_timeout_secs: u64,

    /// How long shutdown waits for in-flight connections and tunnels.
    pub shutdown_grace_secs: u64,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server_address: ":8080".to_string(),
            max_connections: 10_000,
            max_requests_per_conn: 5_000,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            client_read_timeout_secs: 15,
            client_write_timeout_secs: 15,
            client_max_idle_conn_duration_secs: 60,
            pool_max_idle: 1024,
            tunnel_idle_timeout_secs: 300,
            shutdown_grace_secs: 10,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ProxyConfig {
    /// The address handed to the TCP listener.
    ///
    /// `:8080` becomes `0.0.0.0:8080`; anything else is passed through.
    pub fn listen_address(&self) -> String {
        match self.server_address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => self.server_address.clone(),
        }
    }

    /// Settings used to build each pooled outbound client.
    pub fn outbound(&self) -> OutboundSettings {
        OutboundSettings {
            read_timeout: Duration::from_secs(self.client_read_timeout_secs),
            write_timeout: Duration::from_secs(self.client_write_timeout_secs),
            max_idle_conn_duration: Duration::from_secs(self.client_max_idle_conn_duration_secs),
        }
    }

    pub fn tunnel_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_idle_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Timeouts applied to every outbound client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundSettings {
    /// Deadline for the origin's response head.
    pub read_timeout: Duration,
    /// Deadline for establishing the outbound connection.
    pub write_timeout: Duration,
    /// Idle lifetime of a kept-alive outbound connection.
    pub max_idle_conn_duration: Duration,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable output for local runs.
    Pretty,
}
