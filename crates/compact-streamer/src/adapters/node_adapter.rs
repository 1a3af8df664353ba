//! Node Adapter
//!
//! Wraps a [`FullNodeConnection`] with a concurrency limit and bounded
//! retries, and exposes the block/transaction lookups the service needs.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::StreamerConfig;
use crate::domain::{
    AddressUtxo, BlockHash, BlockHeight, BlockId, BlockLookup, ChainTip, FullBlock, NodeInfo,
    RawTransaction, SendResponse, StreamerError, SubmitOutcome, TreeState, TxFilter,
};
use crate::ports::outbound::FullNodeConnection;

/// Node code for a transaction that could not be decoded.
pub const RPC_DESERIALIZATION_ERROR: i32 = -22;

/// Exponential backoff for transient node failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy from the streamer config.
    pub fn from_config(config: &StreamerConfig) -> Self {
        Self {
            max_retries: config.max_node_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Full node access with retries and a concurrent-request limit.
pub struct NodeAdapter<N: FullNodeConnection> {
    node: N,
    permits: Semaphore,
    retry: RetryPolicy,
}

impl<N: FullNodeConnection> NodeAdapter<N> {
    /// Wrap a connection.
    pub fn new(node: N, config: &StreamerConfig) -> Self {
        Self {
            node,
            permits: Semaphore::new(config.max_concurrent_node_requests.max(1)),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Underlying connection.
    pub fn connection(&self) -> &N {
        &self.node
    }

    /// Run `op` under a permit, retrying transient failures.
    async fn call<T, F, Fut>(&self, what: &str, op: F) -> Result<T, StreamerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StreamerError>>,
    {
        let mut attempt = 0;
        loop {
            let result = {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    StreamerError::NodeUnavailable("node request limiter closed".to_string())
                })?;
                op().await
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "[cs] Node {} {} failed (attempt {}): {}; retrying in {:?}",
                        self.node.node_id(),
                        what,
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Current best block.
    pub async fn chain_tip(&self) -> Result<ChainTip, StreamerError> {
        self.call("chain_tip", || self.node.chain_tip()).await
    }

    /// Current best height.
    pub async fn latest_height(&self) -> Result<BlockHeight, StreamerError> {
        Ok(self.chain_tip().await?.height)
    }

    /// Canonical hash at `height`.
    pub async fn canonical_hash(&self, height: BlockHeight) -> Result<BlockHash, StreamerError> {
        self.call("block_hash", || self.node.block_hash(height)).await
    }

    async fn fetch(&self, lookup: BlockLookup) -> Result<FullBlock, StreamerError> {
        debug!("[cs] Fetching block by {} from {}", lookup, self.node.node_id());
        self.call("block", || self.node.block(lookup)).await
    }

    /// Full block for a [`BlockId`].
    ///
    /// With both fields set the block is fetched by height and must carry
    /// the requested hash, otherwise the chain moved: `Reorganized`.
    pub async fn block_at(&self, id: &BlockId) -> Result<FullBlock, StreamerError> {
        id.validate()?;
        match (id.height, id.hash) {
            (Some(height), Some(hash)) => {
                let block = self.fetch(BlockLookup::Height(height)).await?;
                if block.hash != hash {
                    debug!(
                        "[cs] Block at {} is {}, caller expected {}",
                        height, block.hash, hash
                    );
                    return Err(StreamerError::Reorganized { height });
                }
                Ok(block)
            }
            (Some(height), None) => {
                let block = self.fetch(BlockLookup::Height(height)).await?;
                expect_height(&block, height)?;
                Ok(block)
            }
            (None, Some(hash)) => {
                let block = self.fetch(BlockLookup::Hash(hash)).await?;
                expect_hash(&block, &hash)?;
                Ok(block)
            }
            (None, None) => Err(StreamerError::InvalidArgument(
                "block id needs a height or a hash".to_string(),
            )),
        }
    }

    /// Full block by hash, which the caller resolved at `height`.
    pub async fn block_by_hash(
        &self,
        height: BlockHeight,
        hash: BlockHash,
    ) -> Result<FullBlock, StreamerError> {
        let block = self.fetch(BlockLookup::Hash(hash)).await?;
        expect_hash(&block, &hash)?;
        expect_height(&block, height)?;
        Ok(block)
    }

    /// Transaction by id (chain or mempool) or by block position.
    pub async fn raw_tx(&self, filter: &TxFilter) -> Result<RawTransaction, StreamerError> {
        match filter {
            TxFilter::Hash(txid) => {
                self.call("raw_transaction", || self.node.raw_transaction(txid))
                    .await
            }
            TxFilter::Position { block, index } => {
                let full = self.block_at(block).await?;
                let tx = full.transactions.get(*index as usize).ok_or_else(|| {
                    StreamerError::NotFound(format!(
                        "transaction index {} in block {} ({} transactions)",
                        index,
                        full.height,
                        full.transactions.len()
                    ))
                })?;
                Ok(RawTransaction {
                    data: tx.raw.clone(),
                    height: full.height,
                })
            }
        }
    }

    /// Relay a transaction once.
    ///
    /// Rejections come back as a failed [`SendResponse`]; only an
    /// unreachable node is an error.
    pub async fn submit_tx(&self, data: &[u8]) -> Result<SendResponse, StreamerError> {
        if data.is_empty() {
            return Ok(SendResponse::rejected(
                RPC_DESERIALIZATION_ERROR,
                "empty transaction payload",
            ));
        }

        let outcome = {
            let _permit = self.permits.acquire().await.map_err(|_| {
                StreamerError::NodeUnavailable("node request limiter closed".to_string())
            })?;
            self.node.send_raw_transaction(data).await
        };

        match outcome {
            Ok(SubmitOutcome::Accepted(txid)) => {
                info!("[cs] Relayed transaction {} ({} bytes)", txid, data.len());
                Ok(SendResponse::accepted(txid))
            }
            Ok(SubmitOutcome::Rejected { code, message }) => {
                info!("[cs] Node rejected transaction: {} {}", code, message);
                Ok(SendResponse::rejected(code, message))
            }
            Err(e @ StreamerError::NodeUnavailable(_)) => Err(e),
            Err(e) => {
                warn!("[cs] Transaction relay failed: {}", e);
                Ok(SendResponse::rejected(e.error_code(), e.to_string()))
            }
        }
    }

    /// Commitment tree frontiers at a block.
    pub async fn tree_state(&self, lookup: BlockLookup) -> Result<TreeState, StreamerError> {
        self.call("tree_state", || self.node.tree_state(lookup)).await
    }

    /// Unspent outputs paying any of `addresses`.
    pub async fn address_utxos(
        &self,
        addresses: &[String],
    ) -> Result<Vec<AddressUtxo>, StreamerError> {
        self.call("address_utxos", || self.node.address_utxos(addresses))
            .await
    }

    /// Mined transactions touching `address` between `start` and `end`.
    ///
    /// One node call for the ids, then one per transaction.
    pub async fn address_transactions(
        &self,
        address: &str,
        start: BlockHeight,
        end: BlockHeight,
    ) -> Result<Vec<RawTransaction>, StreamerError> {
        let txids = self
            .call("address_txids", || self.node.address_txids(address, start, end))
            .await?;
        debug!(
            "[cs] {} transactions for {} in {}..={}",
            txids.len(),
            address,
            start,
            end
        );
        let mut transactions = Vec::with_capacity(txids.len());
        for txid in &txids {
            let tx = self
                .call("raw_transaction", || self.node.raw_transaction(txid))
                .await?;
            transactions.push(tx);
        }
        Ok(transactions)
    }

    /// Chain and build facts.
    pub async fn node_info(&self) -> Result<NodeInfo, StreamerError> {
        self.call("node_info", || self.node.node_info()).await
    }
}

fn expect_height(block: &FullBlock, height: BlockHeight) -> Result<(), StreamerError> {
    if block.height != height {
        return Err(StreamerError::CorruptInput(format!(
            "node returned block {} for height {}",
            block.height, height
        )));
    }
    Ok(())
}

fn expect_hash(block: &FullBlock, hash: &BlockHash) -> Result<(), StreamerError> {
    if block.hash != *hash {
        return Err(StreamerError::CorruptInput(format!(
            "node returned block {} for hash {}",
            block.hash, hash
        )));
    }
    Ok(())
}
