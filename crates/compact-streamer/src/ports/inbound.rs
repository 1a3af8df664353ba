//! # Inbound Ports
//!
//! The RPC surface every compact block server implements.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    AddressUtxo, BlockId, BlockRange, ChainSpec, CompactBlock, GetAddressUtxosArg, LightdInfo,
    RawTransaction, SendResponse, StreamerError, TransparentAddressBlockFilter, TreeState,
    TxFilter,
};

/// Ordered stream of compact blocks; ends after the last height or the
/// first error.
pub type CompactBlockStream =
    Pin<Box<dyn Stream<Item = Result<Arc<CompactBlock>, StreamerError>> + Send>>;

/// Compact transaction streamer - inbound port.
///
/// Every method must be implemented; there are no default stubs.
#[async_trait]
pub trait CompactTxStreamer: Send + Sync {
    /// Current tip of the requested chain. Never cached.
    async fn get_latest_block(&self, chain: ChainSpec) -> Result<BlockId, StreamerError>;

    /// One compacted block.
    async fn get_block(&self, id: BlockId) -> Result<Arc<CompactBlock>, StreamerError>;

    /// Stream compact blocks over an inclusive, direction-aware range.
    ///
    /// Range errors are reported here; node errors arrive in the stream.
    async fn get_block_range(&self, range: BlockRange) -> Result<CompactBlockStream, StreamerError>;

    /// As [`get_block_range`](Self::get_block_range), ending with
    /// `Cancelled` once `cancel` fires.
    async fn open_block_range(
        &self,
        range: BlockRange,
        cancel: CancellationToken,
    ) -> Result<CompactBlockStream, StreamerError>;

    /// A transaction from the chain or the mempool.
    async fn get_transaction(&self, filter: TxFilter) -> Result<RawTransaction, StreamerError>;

    /// Relay a transaction once. Node rejections are a response, not an error.
    async fn send_transaction(&self, tx: RawTransaction) -> Result<SendResponse, StreamerError>;

    /// Note commitment tree state at a block.
    async fn get_tree_state(&self, id: BlockId) -> Result<TreeState, StreamerError>;

    /// Unspent outputs of transparent addresses.
    async fn get_address_utxos(
        &self,
        arg: GetAddressUtxosArg,
    ) -> Result<Vec<AddressUtxo>, StreamerError>;

    /// Mined transactions touching a transparent address, ascending.
    async fn get_taddress_txids(
        &self,
        filter: TransparentAddressBlockFilter,
    ) -> Result<Vec<RawTransaction>, StreamerError>;

    /// Server and chain metadata.
    async fn get_lightd_info(&self) -> Result<LightdInfo, StreamerError>;
}
