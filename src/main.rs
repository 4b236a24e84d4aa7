//! SEP Gateway Server
//!
//! Loads configuration, sets up logging and serves the gateway until
//! interrupted.

use anyhow::Context;
use sep_gateway::{Gateway, GatewayConfig, KuboBackend};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Main entry point for the SEP gateway
///
/// # Usage
/// ```bash
/// # Configure from the environment (IPFS_API, LRU_CACHE_SIZE, ...)
/// sep-gateway
///
/// # Configure from a YAML file
/// sep-gateway /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting SEP gateway");

    let config = match env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            GatewayConfig::from_file(&path)
        }
        None => {
            info!("Loading configuration from environment");
            GatewayConfig::from_env()
        }
    }
    .context("Failed to load configuration")?;

    let backend_url = config.backend_url()?;
    info!("Configuration loaded successfully");
    info!("  - Backend: {}", backend_url);
    info!("  - Cache capacity: {} records", config.cache_capacity);
    info!("  - Request timeout: {:?}", config.request_timeout());
    info!("  - Backend timeout: {:?}", config.backend_timeout());
    info!("  - Max descriptor size: {} bytes", config.max_descriptor_bytes);

    let backend = Arc::new(
        KuboBackend::with_timeout(&backend_url, config.backend_timeout())
            .context("Failed to create Kubo client")?,
    );
    let gateway = Arc::new(Gateway::new(&config, backend)?);

    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tokio::select! {
        result = gateway.serve(listener) => {
            if let Err(e) = &result {
                error!("Server stopped: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("SEP gateway stopped");
    Ok(())
}
