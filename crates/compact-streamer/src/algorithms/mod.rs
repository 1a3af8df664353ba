//! # Algorithms Module
//!
//! Block compaction and range streaming.

pub mod compactor;
pub mod range_stream;

pub use compactor::{compact, COMPACT_NOTE_SIZE};
pub use range_stream::{clamp_to_tip, spawn_range_stream, RangeStreamEngine, StreamPolicy};
