//! Gorilla Server - HTTP API for the series cache

mod api;

use anyhow::Context;
use gorilla_core::storage::{Storage, StorageConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Data directory
    pub data_dir: PathBuf,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8086)),
            data_dir: PathBuf::from("data"),
            json_logs: false,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `GORILLA_*` environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("GORILLA_HTTP_ADDR") {
            config.http_addr = addr
                .parse()
                .with_context(|| format!("invalid GORILLA_HTTP_ADDR: {addr}"))?;
        }
        if let Ok(dir) = std::env::var("GORILLA_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(format) = std::env::var("GORILLA_LOG_FORMAT") {
            config.json_logs = format.eq_ignore_ascii_case("json");
        }

        Ok(config)
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    init_logging(config.json_logs);

    info!("Starting Gorilla server v{}...", gorilla_core::VERSION);
    info!("Data directory: {:?}", config.data_dir);
    info!("HTTP server: http://{}", config.http_addr);

    // Initialize storage
    let storage_config = StorageConfig {
        data_dir: config.data_dir.clone(),
        ..Default::default()
    };
    let storage = Arc::new(Storage::open(storage_config).context("failed to open storage")?);

    // Create router
    let app = api::create_router(storage.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!("Gorilla server listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Persist hot buckets so the next start can warm them
    info!("Flushing hot buckets...");
    let flushed = tokio::task::spawn_blocking(move || storage.flush_all()).await?;
    if let Err(e) = flushed {
        error!("Flush on shutdown failed: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
