//! Runtime errors.

use compact_streamer::StreamerError;
use streamer_telemetry::TelemetryError;
use thiserror::Error;

/// Errors that stop the runtime from starting or serving.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration could not be read or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener could not bind or the server failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Logging or metrics setup failed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// Full node client could not be built.
    #[error("Node client error: {0}")]
    Node(#[from] StreamerError),
}
