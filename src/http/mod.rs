//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted TCP connection
//!     → server.rs (hyper HTTP/1.1 connection with upgrades)
//!     → proxy::dispatch per request
//!     → response (or upgrade to a raw tunnel)
//! ```

pub mod server;

pub use server::HttpServer;
