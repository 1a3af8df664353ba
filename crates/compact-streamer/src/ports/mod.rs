//! # Ports Module
//!
//! Hexagonal architecture ports (interfaces).

pub mod inbound;
pub mod outbound;

pub use inbound::{CompactBlockStream, CompactTxStreamer};
pub use outbound::FullNodeConnection;
