//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits and timeouts > 0)
//! - Validate addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server_address cannot be empty")]
    EmptyServerAddress,

    #[error("{0} must be greater than 0")]
    NotPositive(&'static str),

    #[error("metrics_address {0:?} is not a valid socket address")]
    InvalidMetricsAddress(String),
}

/// Check every field of `config`, collecting all problems found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server_address.trim().is_empty() {
        errors.push(ValidationError::EmptyServerAddress);
    }

    let counts = [
        ("max_connections", config.max_connections),
        ("max_requests_per_conn", config.max_requests_per_conn),
        ("pool_max_idle", config.pool_max_idle),
    ];
    for (name, value) in counts {
        if value == 0 {
            errors.push(ValidationError::NotPositive(name));
        }
    }

    let durations = [
        ("client_read_timeout_secs", config.client_read_timeout_secs),
        ("client_write_timeout_secs", config.client_write_timeout_secs),
        ("client_max_idle_conn_duration_secs", config.client_max_idle_conn_duration_secs),
        ("tunnel_idle_timeout_secs", config.tunnel_idle_timeout_secs),
        ("shutdown_grace_secs", config.shutdown_grace_secs),
    ];
    for (name, value) in durations {
        if value == 0 {
            errors.push(ValidationError::NotPositive(name));
        }
    }

    if config.metrics_enabled && config.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(config.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
