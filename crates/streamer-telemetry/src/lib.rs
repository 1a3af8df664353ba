//! # Streamer Telemetry
//!
//! Structured logging and Prometheus metrics for Compact-Streamer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use streamer_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_telemetry(&config).expect("Failed to init telemetry");
//!
//!     // Logs and metrics are now being collected
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `STREAMER_SERVICE_NAME` | `compact-streamer` | Service name in startup logs |
//! | `STREAMER_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `STREAMER_JSON_LOGS` | `false` (`true` in containers) | JSON log output |
//! | `STREAMER_METRICS` | `true` | Serve Prometheus metrics |

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging};
pub use metrics::{encode_metrics, record_cache, register_metrics, RequestTimer};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Subscriber could not be installed or the filter is malformed.
    #[error("Failed to initialize logger: {0}")]
    LoggerInit(String),

    /// Registry rejected a metric or encoding failed.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging and register metrics.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if config.metrics_enabled {
        register_metrics()?;
    }
    init_logging(config)
}
