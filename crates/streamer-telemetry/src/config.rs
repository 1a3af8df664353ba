//! Telemetry configuration from environment variables.

use std::env;

use serde::Deserialize;

/// Configuration for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs
    pub service_name: String,

    /// Log filter directive (trace, debug, info, warn, error, or a full EnvFilter)
    pub log_level: String,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,

    /// Whether to colour console output
    pub ansi: bool,

    /// Whether `/metrics` is served
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "compact-streamer".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            ansi: true,
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `STREAMER_SERVICE_NAME`: Service name (default: compact-streamer)
    /// - `STREAMER_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `STREAMER_JSON_LOGS`: Enable JSON logs (default: true in containers)
    /// - `STREAMER_METRICS`: Serve Prometheus metrics (default: true)
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment variables on top of this configuration.
    pub fn with_env_overrides(mut self) -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        if let Ok(name) = env::var("STREAMER_SERVICE_NAME") {
            self.service_name = name;
        }
        if let Ok(level) = env::var("STREAMER_LOG_LEVEL").or_else(|_| env::var("RUST_LOG")) {
            self.log_level = level;
        }
        match env::var("STREAMER_JSON_LOGS") {
            Ok(v) => self.json_logs = parse_flag(&v),
            Err(_) if is_container => self.json_logs = true,
            Err(_) => {}
        }
        if let Ok(v) = env::var("STREAMER_METRICS") {
            self.metrics_enabled = parse_flag(&v);
        }
        self.ansi = !self.json_logs && self.ansi;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
