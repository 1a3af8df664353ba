//! # Runtime Configuration
//!
//! One TOML document with a section per concern, then `STREAMER_*`
//! environment overrides on top.
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:9067"
//!
//! [node]
//! url = "http://127.0.0.1:8232"
//! user = "rpcuser"
//! password = "rpcpassword"
//!
//! [streamer]
//! network = "main"
//! cache_capacity = 10000
//!
//! [telemetry]
//! json_logs = true
//! ```

use std::env;
use std::net::SocketAddr;
use std::path::Path;

use compact_streamer::{JsonRpcNodeConfig, Network, StreamerConfig};
use serde::Deserialize;
use streamer_telemetry::TelemetryConfig;
use tracing::warn;

use crate::error::RuntimeError;

/// Path of the TOML config file, if any.
pub const CONFIG_PATH_ENV: &str = "STREAMER_CONFIG";

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Listener settings.
    pub server: ServerConfig,
    /// Full node connection.
    pub node: JsonRpcNodeConfig,
    /// Streaming core.
    pub streamer: StreamerConfig,
    /// Logging and metrics.
    pub telemetry: TelemetryConfig,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds.
    pub listen_addr: SocketAddr,
    /// Whether `/ws` is served.
    pub websocket_enabled: bool,
    /// Requests accepted in one JSON-RPC batch.
    pub max_batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9067)),
            websocket_enabled: true,
            max_batch_size: 64,
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, RuntimeError> {
        toml::from_str(text).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Read a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Load from `STREAMER_CONFIG` (or defaults), apply env overrides, validate.
    pub fn load() -> Result<Self, RuntimeError> {
        let config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        let config = config.with_env_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `STREAMER_*` overrides read through `lookup`.
    ///
    /// # Variables
    ///
    /// - `STREAMER_LISTEN_ADDR`: listener address
    /// - `STREAMER_NODE_URL`, `STREAMER_NODE_USER`, `STREAMER_NODE_PASSWORD`
    /// - `STREAMER_NETWORK`: main, test or regtest
    /// - `STREAMER_CACHE_CAPACITY`: cached compact blocks
    ///
    /// Unparseable values are logged and ignored. Telemetry variables are
    /// handled by [`TelemetryConfig::with_env_overrides`].
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(addr) = lookup("STREAMER_LISTEN_ADDR") {
            match addr.parse() {
                Ok(addr) => self.server.listen_addr = addr,
                Err(_) => warn!("[cs] Ignoring bad STREAMER_LISTEN_ADDR {}", addr),
            }
        }
        if let Some(url) = lookup("STREAMER_NODE_URL") {
            self.node.url = url;
        }
        if let Some(user) = lookup("STREAMER_NODE_USER") {
            self.node.user = Some(user);
        }
        if let Some(password) = lookup("STREAMER_NODE_PASSWORD") {
            self.node.password = Some(password);
        }
        if let Some(network) = lookup("STREAMER_NETWORK") {
            match network.parse::<Network>() {
                Ok(network) => self.streamer.network = network,
                Err(_) => warn!("[cs] Ignoring bad STREAMER_NETWORK {}", network),
            }
        }
        if let Some(capacity) = lookup("STREAMER_CACHE_CAPACITY") {
            match capacity.parse() {
                Ok(capacity) => self.streamer.cache_capacity = capacity,
                Err(_) => warn!("[cs] Ignoring bad STREAMER_CACHE_CAPACITY {}", capacity),
            }
        }
        self.telemetry = self.telemetry.with_env_overrides();
        self
    }

    /// Reject settings the runtime cannot start with.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        self.streamer
            .validate()
            .map_err(|e| RuntimeError::Config(e.to_string()))?;
        if self.node.url.is_empty() {
            return Err(RuntimeError::Config("node.url must not be empty".into()));
        }
        if self.server.max_batch_size == 0 {
            return Err(RuntimeError::Config(
                "server.max_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
