//! # Compact-Streamer
//!
//! Serves compact blocks from a full node to light clients.
//!
//! Configuration comes from the TOML file named by `STREAMER_CONFIG`
//! (optional) plus `STREAMER_*` environment overrides.

use anyhow::{Context, Result};
use tracing::{error, info};

use streamer_runtime::{RuntimeConfig, StreamerRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::load().context("failed to load configuration")?;
    streamer_telemetry::init_telemetry(&config.telemetry)
        .context("failed to initialize telemetry")?;

    let runtime = StreamerRuntime::bind(&config)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;

    let shutdown = runtime.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("[cs] Shutdown signal received"),
            Err(e) => error!("[cs] Failed to listen for Ctrl+C: {}", e),
        }
        shutdown.cancel();
    });

    runtime.run().await?;
    Ok(())
}
