//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (JSON lines or pretty)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments behind the `metrics` facade)
//! - Recording is a no-op until an exporter is installed, so tests need no setup

pub mod logging;
pub mod metrics;
