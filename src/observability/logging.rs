//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber once at startup
//! - Map the configured log level onto an `EnvFilter`
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` overrides the configured level when set
//! - Unknown levels fall back to `info`

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init(level: &str, format: LogFormat) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    }
}

/// Normalize a configured level into a filter directive.
pub fn filter_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_levels_pass_through() {
        assert_eq!(filter_directive("debug"), "debug");
        assert_eq!(filter_directive("WARN"), "warn");
        assert_eq!(filter_directive(" error "), "error");
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(filter_directive("info"), "info");
        assert_eq!(filter_directive("verbose"), "info");
        assert_eq!(filter_directive(""), "info");
    }
}
