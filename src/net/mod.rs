//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, per-IP connection cap)
//!     → connection.rs (lifecycle tracking for graceful shutdown)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Over-cap peers get an immediate 429 instead of waiting in the queue
//! - Connections and tunnels are tracked so shutdown can drain them

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker, TrackedKind};
pub use listener::{ConnectionPermit, Listener, ListenerError};
