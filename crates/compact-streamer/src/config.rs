//! # Streamer Configuration
//!
//! Immutable settings for the streaming core, built once at startup.

use serde::{Deserialize, Serialize};

use crate::domain::{Network, StreamerError};

/// Streaming core configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Network the backing full node serves.
    pub network: Network,

    /// Vendor string reported by GetLightdInfo.
    pub vendor: String,

    /// Sapling activation height. `None` uses the network default.
    pub sapling_activation_height: Option<u64>,

    /// Whether transparent address data is served.
    pub taddr_support: bool,

    /// Compact blocks kept in the LRU cache.
    pub cache_capacity: usize,

    /// Concurrent requests allowed against the full node.
    pub max_concurrent_node_requests: usize,

    /// Retries for transient node failures (0 disables retrying).
    pub max_node_retries: u32,

    /// First retry delay in milliseconds; doubles per attempt.
    pub retry_base_delay_ms: u64,

    /// Upper bound for a single retry delay.
    pub retry_max_delay_ms: u64,

    /// Range streams re-check recent hashes after this many emissions.
    pub revalidate_interval: u64,

    /// How many recently emitted heights a re-check covers.
    pub revalidate_depth: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            network: Network::Main,
            vendor: "CompactStreamer".to_string(),
            sapling_activation_height: None,
            taddr_support: true,
            cache_capacity: 10_000,
            max_concurrent_node_requests: 16,
            max_node_retries: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            revalidate_interval: 10,
            revalidate_depth: 10,
        }
    }
}

impl StreamerConfig {
    /// Create a config for testing (small cache, fast retries, eager revalidation).
    pub fn for_testing() -> Self {
        Self {
            network: Network::Regtest,
            vendor: "CompactStreamer-test".to_string(),
            sapling_activation_height: None,
            taddr_support: true,
            cache_capacity: 64,
            max_concurrent_node_requests: 4,
            max_node_retries: 2,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            revalidate_interval: 1,
            revalidate_depth: 8,
        }
    }

    /// Sapling activation height, explicit or the network default.
    pub fn sapling_activation(&self) -> u64 {
        self.sapling_activation_height
            .unwrap_or_else(|| self.network.sapling_activation_height())
    }

    /// Reject settings the core cannot run with.
    pub fn validate(&self) -> Result<(), StreamerError> {
        if self.cache_capacity == 0 {
            return Err(invalid("cache_capacity must be at least 1"));
        }
        if self.max_concurrent_node_requests == 0 {
            return Err(invalid("max_concurrent_node_requests must be at least 1"));
        }
        if self.revalidate_interval == 0 {
            return Err(invalid("revalidate_interval must be at least 1"));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(invalid("retry_base_delay_ms exceeds retry_max_delay_ms"));
        }
        if self.vendor.is_empty() {
            return Err(invalid("vendor must not be empty"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> StreamerError {
    StreamerError::InvalidArgument(format!("config: {}", msg))
}
