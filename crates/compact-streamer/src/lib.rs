//! # Compact Streamer
//!
//! Serves compact blocks to light clients from a full node.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Light wallets need only nullifiers, note commitments, ephemeral keys
//! and the first 52 bytes of each note ciphertext to find their funds.
//! This crate fetches full blocks from a node, compacts them, caches the
//! result and streams it back over arbitrary height ranges, while the
//! node's chain may reorganize underneath.
//!
//! ## Guarantees
//!
//! | Concern | Behaviour |
//! |---------|-----------|
//! | Ordering | One item per height, strictly monotonic, no gaps |
//! | Backpressure | Pull-based; at most one block prepared ahead |
//! | Reorgs | Parent-link check per block plus periodic hash re-checks |
//! | Cancellation | Dropping a stream or firing its token stops all work |
//! | Node safety | Bounded concurrency, bounded retries of transient failures |
//!
//! ## Module Structure
//!
//! ```text
//! compact-streamer/
//! ├── domain/          # Hashes, block ids, ranges, full/compact blocks, errors
//! ├── algorithms/      # Compactor, range stream engine
//! ├── cache.rs         # LRU compact block cache with coalesced populates
//! ├── ports/           # CompactTxStreamer (inbound) + FullNodeConnection (outbound)
//! ├── adapters/        # Node adapter, JSON-RPC node, mock node
//! ├── application/     # CompactStreamerService, MethodRouter
//! └── config.rs        # StreamerConfig
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports
pub use adapters::{
    JsonRpcFullNode, JsonRpcNodeConfig, MockFullNode, NodeAdapter, RetryPolicy,
    RPC_DESERIALIZATION_ERROR,
};
pub use algorithms::{
    clamp_to_tip, compact, spawn_range_stream, RangeStreamEngine, StreamPolicy, COMPACT_NOTE_SIZE,
};
pub use application::{CompactStreamerService, CorrelationId, Method, MethodRouter, Reply};
pub use cache::{CacheStats, CompactBlockCache};
pub use config::StreamerConfig;
pub use domain::{
    codes, AddressUtxo, BlockHash, BlockHeight, BlockId, BlockLookup, BlockRange, ChainSpec,
    ChainTip, CompactBlock, CompactOrchardAction, CompactSaplingOutput, CompactSaplingSpend,
    CompactTx, CompactTxIn, Direction, FullBlock, FullTransaction, GetAddressUtxosArg, Hash32,
    LightdInfo, Network, NodeInfo, RawTransaction, ResolvedRange, SendResponse, StreamerError,
    SubmitOutcome, TransparentAddressBlockFilter, TreeState, TxFilter, TxId, TxOut,
    PROTO_VERSION,
};
pub use ports::{CompactBlockStream, CompactTxStreamer, FullNodeConnection};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
