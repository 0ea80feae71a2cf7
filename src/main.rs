//! Forward Proxy
//!
//! A forwarding HTTP proxy with CONNECT tunneling, built with Tokio and hyper.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                  FORWARD PROXY                   │
//!                        │                                                  │
//!   Client ──────────────┼─▶ net::Listener ──▶ http::server ──▶ dispatch   │
//!                        │   (per-IP cap)      (HTTP/1.1)          │        │
//!                        │                              ┌──────────┴─────┐  │
//!                        │                              ▼                ▼  │
//!                        │                        proxy::forward  proxy::tunnel
//!                        │                         (pooled client)   │      │
//!                        │                              │            ▼      │
//!                        │                              │     proxy::relay  │
//!                        │                              ▼       (2 tasks)   │
//!   Origin / Destination ◀──────────────────────────────┴────────────┘      │
//!                        │                                                  │
//!                        │  config · observability · lifecycle              │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use forward_proxy::config::{load_config, load_config_or_default, DEFAULT_CONFIG_PATH};
use forward_proxy::lifecycle;
use forward_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "forward-proxy", version)]
#[command(about = "Forwarding HTTP proxy with CONNECT tunneling", long_about = None)]
struct Cli {
    /// Path to the TOML config file [default: ./config.toml, optional]
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_config_or_default(Path::new(DEFAULT_CONFIG_PATH))?,
    };

    logging::init(&config.log_level, config.log_format)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        server_address = %config.server_address,
        read_timeout_secs = config.client_read_timeout_secs,
        write_timeout_secs = config.client_write_timeout_secs,
        max_idle_conn_duration_secs = config.client_max_idle_conn_duration_secs,
        "Configuration loaded"
    );

    lifecycle::run(Arc::new(config)).await?;

    tracing::info!("Proxy server stopped");
    Ok(())
}
