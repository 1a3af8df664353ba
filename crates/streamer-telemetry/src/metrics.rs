//! Prometheus metrics for the compact streamer.
//!
//! All metrics follow the naming convention: `cs_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., blocks_streamed_total)
//! - **Gauge**: Value that can go up or down (e.g., cache_entries)
//! - **Histogram**: Distribution of values (e.g., request_duration_seconds)

use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // REQUEST METRICS
    // =========================================================================

    /// Calls by method and outcome
    pub static ref REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cs_requests_total", "Calls handled by method and outcome"),
        &["method", "outcome"]  // outcome: ok or an error kind
    ).expect("metric creation failed");

    /// Call duration by method; streams are timed until their last item
    pub static ref REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "cs_request_duration_seconds",
            "Time spent serving a call"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).expect("bucket layout")),
        &["method"]
    ).expect("metric creation failed");

    // =========================================================================
    // STREAM METRICS
    // =========================================================================

    /// Compact blocks sent to clients
    pub static ref BLOCKS_STREAMED: IntCounter = IntCounter::new(
        "cs_stream_blocks_total",
        "Compact blocks delivered over range streams"
    ).expect("metric creation failed");

    /// Range streams ended, by reason
    pub static ref STREAMS_TERMINATED: IntCounterVec = IntCounterVec::new(
        Opts::new("cs_streams_terminated_total", "Range streams ended by reason"),
        &["reason"]  // reason: complete/reorganized/cancelled/disconnected/failed
    ).expect("metric creation failed");

    /// Range streams currently open
    pub static ref STREAMS_ACTIVE: IntGauge = IntGauge::new(
        "cs_streams_active",
        "Range streams currently being served"
    ).expect("metric creation failed");

    // =========================================================================
    // CACHE METRICS
    // =========================================================================

    /// Compact blocks held in the cache
    pub static ref CACHE_ENTRIES: IntGauge = IntGauge::new(
        "cs_cache_entries",
        "Compact blocks currently cached"
    ).expect("metric creation failed");

    /// Cache hits since start
    pub static ref CACHE_HITS: IntGauge = IntGauge::new(
        "cs_cache_hits",
        "Cache lookups served from memory since start"
    ).expect("metric creation failed");

    /// Cache misses since start
    pub static ref CACHE_MISSES: IntGauge = IntGauge::new(
        "cs_cache_misses",
        "Cache lookups that went to the node since start"
    ).expect("metric creation failed");

    // =========================================================================
    // NODE METRICS
    // =========================================================================

    /// Last tip height reported by the node
    pub static ref NODE_TIP_HEIGHT: IntGauge = IntGauge::new(
        "cs_node_tip_height",
        "Chain tip height last reported by the full node"
    ).expect("metric creation failed");

    /// Transactions relayed, by result
    pub static ref TX_SUBMISSIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("cs_tx_submissions_total", "Transactions relayed to the node"),
        &["result"]  // result: accepted/rejected
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Requests
        Box::new(REQUESTS_TOTAL.clone()),
        Box::new(REQUEST_DURATION.clone()),
        // Streams
        Box::new(BLOCKS_STREAMED.clone()),
        Box::new(STREAMS_TERMINATED.clone()),
        Box::new(STREAMS_ACTIVE.clone()),
        // Cache
        Box::new(CACHE_ENTRIES.clone()),
        Box::new(CACHE_HITS.clone()),
        Box::new(CACHE_MISSES.clone()),
        // Node
        Box::new(NODE_TIP_HEIGHT.clone()),
        Box::new(TX_SUBMISSIONS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Cache counters as seen by the exporter.
pub fn record_cache(entries: usize, hits: u64, misses: u64) {
    CACHE_ENTRIES.set(entries as i64);
    CACHE_HITS.set(hits as i64);
    CACHE_MISSES.set(misses as i64);
}

/// Times one call and records its outcome when finished.
pub struct RequestTimer {
    method: &'static str,
    start: Instant,
}

impl RequestTimer {
    /// Start timing a call.
    pub fn start(method: &'static str) -> Self {
        Self {
            method,
            start: Instant::now(),
        }
    }

    /// Record duration and outcome.
    pub fn finish(self, outcome: &str) {
        REQUEST_DURATION
            .with_label_values(&[self.method])
            .observe(self.start.elapsed().as_secs_f64());
        REQUESTS_TOTAL
            .with_label_values(&[self.method, outcome])
            .inc();
    }
}
