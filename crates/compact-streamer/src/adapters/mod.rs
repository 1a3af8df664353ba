//! # Adapters Layer (Hexagonal Architecture)
//!
//! Full node connections and the adapter the core talks through.

mod json_rpc;
mod mock_node;
mod node_adapter;

pub use json_rpc::{JsonRpcFullNode, JsonRpcNodeConfig};
pub use mock_node::{MockFullNode, MOCK_TX_HEADER};
pub use node_adapter::{NodeAdapter, RetryPolicy, RPC_DESERIALIZATION_ERROR};
