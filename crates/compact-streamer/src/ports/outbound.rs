//! # Outbound Ports
//!
//! What the streaming core needs from a full node.

use async_trait::async_trait;

use crate::domain::{
    AddressUtxo, BlockHash, BlockHeight, BlockLookup, ChainTip, FullBlock, NodeInfo,
    RawTransaction, StreamerError, SubmitOutcome, TreeState, TxId,
};

/// Full node connection - outbound port.
///
/// Implementations report `NodeUnavailable` for transport failures and
/// `NotFound` for absent data; retrying is left to the caller.
#[async_trait]
pub trait FullNodeConnection: Send + Sync {
    /// Current best block.
    async fn chain_tip(&self) -> Result<ChainTip, StreamerError>;

    /// Hash of the best-chain block at `height`.
    async fn block_hash(&self, height: BlockHeight) -> Result<BlockHash, StreamerError>;

    /// Fully decoded block.
    async fn block(&self, lookup: BlockLookup) -> Result<FullBlock, StreamerError>;

    /// Serialized transaction, mempool included (height 0 when unmined).
    async fn raw_transaction(&self, txid: &TxId) -> Result<RawTransaction, StreamerError>;

    /// Relay a serialized transaction.
    async fn send_raw_transaction(&self, data: &[u8]) -> Result<SubmitOutcome, StreamerError>;

    /// Commitment tree frontiers at a block. `network` is left for the
    /// caller to fill.
    async fn tree_state(&self, lookup: BlockLookup) -> Result<TreeState, StreamerError>;

    /// Unspent outputs paying any of `addresses`, in node order.
    async fn address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, StreamerError>;

    /// Ids of mined transactions touching `address` between `start` and
    /// `end` inclusive, ascending by height.
    async fn address_txids(
        &self,
        address: &str,
        start: BlockHeight,
        end: BlockHeight,
    ) -> Result<Vec<TxId>, StreamerError>;

    /// Chain and build facts.
    async fn node_info(&self) -> Result<NodeInfo, StreamerError>;

    /// Node identifier (for logging/debugging).
    fn node_id(&self) -> &str;
}
