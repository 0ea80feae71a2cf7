//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config.toml (optional)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_or_default, ConfigError, DEFAULT_CONFIG_PATH};
pub use schema::{LogFormat, OutboundSettings, ProxyConfig};
pub use validation::{validate_config, ValidationError};
