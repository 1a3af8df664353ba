//! # Compact-Streamer Runtime
//!
//! Wires the streaming core to a full node and serves it.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (`STREAMER_CONFIG` file, then env overrides)
//! 2. Initialize telemetry (logging, metrics registry)
//! 3. Build the JSON-RPC full node client
//! 4. Bind the listener and serve until shutdown
//!
//! ## Modular Structure
//!
//! - `config` - TOML + environment configuration
//! - `server` - axum routes: JSON-RPC, health, metrics
//! - `ws` - WebSocket transport
//! - `rpc` - JSON-RPC envelopes
//! - `instrument` - request/stream metrics

pub mod config;
pub mod error;
pub mod instrument;
pub mod rpc;
pub mod server;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use compact_streamer::{
    CompactStreamerService, FullNodeConnection, JsonRpcFullNode, VERSION,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use config::{RuntimeConfig, ServerConfig, CONFIG_PATH_ENV};
pub use error::RuntimeError;
pub use server::{build_router, AppState};

/// A bound, ready-to-serve streamer.
pub struct StreamerRuntime {
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
}

impl StreamerRuntime {
    /// Bind the listener over the node named in `config`.
    pub async fn bind(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let node = JsonRpcFullNode::new(config.node.clone())?;
        info!("[cs] Full node: {}", config.node.url);
        Self::bind_with_node(config, node).await
    }

    /// Bind the listener over an existing node connection.
    pub async fn bind_with_node<N: FullNodeConnection + 'static>(
        config: &RuntimeConfig,
        node: N,
    ) -> Result<Self, RuntimeError> {
        let shutdown = CancellationToken::new();
        let service = Arc::new(CompactStreamerService::new(node, config.streamer.clone()));
        let state = AppState::new(
            service,
            config.server.clone(),
            config.telemetry.metrics_enabled,
            shutdown.clone(),
        );
        let listener = TcpListener::bind(config.server.listen_addr).await?;
        Ok(Self {
            listener,
            router: build_router(state),
            shutdown,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, RuntimeError> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops the server and every open stream.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until the shutdown token fires.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let addr = self.local_addr()?;
        info!("===========================================");
        info!("  Compact-Streamer v{}", VERSION);
        info!("===========================================");
        info!("[cs] Listening on {}", addr);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(self.shutdown.cancelled_owned())
            .await?;

        info!("[cs] Server stopped");
        Ok(())
    }
}
