//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → metrics exporter → proxy + pool → bind listener → serve
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Trigger → stop accepting → drain connections (bounded grace) → exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: metrics or bind errors abort startup
//! - Listener binds last (traffic only when ready)
//! - In-flight tunnels get the grace period, then are abandoned with the process

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, StartupError};
