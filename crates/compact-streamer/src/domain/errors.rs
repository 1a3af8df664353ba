//! # Domain Errors
//!
//! Error taxonomy shared by the node adapter, compactor, cache, range
//! engine and service facade.

use thiserror::Error;

/// Stable JSON-RPC error codes for each error kind.
pub mod codes {
    /// Unknown method name.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Malformed request parameters (bad range, bad id, wrong chain).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Corrupt data received from the full node.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Requested block or transaction does not exist.
    pub const RESOURCE_NOT_FOUND: i32 = -32001;
    /// Full node could not be reached.
    pub const RESOURCE_UNAVAILABLE: i32 = -32002;
    /// Request was cancelled before completion.
    pub const CANCELLED: i32 = -32006;
    /// Canonical chain changed under an in-flight request.
    pub const REORGANIZED: i32 = -32008;
}

/// Errors surfaced by the streaming core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamerError {
    /// Requested height, hash or transaction is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed block range, reported at stream-open time.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Malformed request value other than a range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The canonical chain changed under an in-flight call or stream.
    #[error("Chain reorganized at height {height}")]
    Reorganized {
        /// Lowest height known to have diverged
        height: u64,
    },

    /// Transient failure talking to the full node.
    #[error("Node unavailable: {0}")]
    NodeUnavailable(String),

    /// Malformed data received from the full node.
    #[error("Corrupt input: {0}")]
    CorruptInput(String),

    /// The consumer cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// Method name not served by the router.
    #[error("Method not found: {0}")]
    MethodNotFound(String),
}

impl StreamerError {
    /// Transient errors may be retried by the node adapter.
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamerError::NodeUnavailable(_))
    }

    /// JSON-RPC error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            StreamerError::NotFound(_) => codes::RESOURCE_NOT_FOUND,
            StreamerError::InvalidRange(_) | StreamerError::InvalidArgument(_) => {
                codes::INVALID_PARAMS
            }
            StreamerError::Reorganized { .. } => codes::REORGANIZED,
            StreamerError::NodeUnavailable(_) => codes::RESOURCE_UNAVAILABLE,
            StreamerError::CorruptInput(_) => codes::INTERNAL_ERROR,
            StreamerError::Cancelled => codes::CANCELLED,
            StreamerError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamerError::NotFound(_) => "not_found",
            StreamerError::InvalidRange(_) => "invalid_range",
            StreamerError::InvalidArgument(_) => "invalid_argument",
            StreamerError::Reorganized { .. } => "reorganized",
            StreamerError::NodeUnavailable(_) => "node_unavailable",
            StreamerError::CorruptInput(_) => "corrupt_input",
            StreamerError::Cancelled => "cancelled",
            StreamerError::MethodNotFound(_) => "method_not_found",
        }
    }
}
