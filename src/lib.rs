//! Forwarding HTTP/HTTPS proxy library.
//!
//! Plain requests are replayed against their origin through a pool of
//! outbound clients; `CONNECT` requests become opaque TCP tunnels.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pool;
pub mod proxy;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
