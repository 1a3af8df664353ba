//! # Compact Streamer Service
//!
//! Application service wiring the node adapter, cache and range engine
//! behind the [`CompactTxStreamer`] port.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapters::NodeAdapter;
use crate::algorithms::{compact, RangeStreamEngine, StreamPolicy};
use crate::cache::{CacheStats, CompactBlockCache};
use crate::config::StreamerConfig;
use crate::domain::{
    AddressUtxo, BlockHash, BlockId, BlockLookup, BlockRange, ChainSpec, CompactBlock,
    GetAddressUtxosArg, LightdInfo, RawTransaction, SendResponse, StreamerError,
    TransparentAddressBlockFilter, TreeState, TxFilter,
};
use crate::ports::{CompactBlockStream, CompactTxStreamer, FullNodeConnection};

/// Compact Streamer Service - serves compact blocks and relays transactions.
pub struct CompactStreamerService<N: FullNodeConnection> {
    /// Configuration.
    config: StreamerConfig,
    /// Full node access.
    node: Arc<NodeAdapter<N>>,
    /// Compact block cache shared with the range engine.
    cache: Arc<CompactBlockCache>,
    /// Range stream engine.
    engine: RangeStreamEngine<N>,
}

impl<N: FullNodeConnection + 'static> CompactStreamerService<N> {
    /// Create a service over a full node connection.
    pub fn new(node: N, config: StreamerConfig) -> Self {
        let node = Arc::new(NodeAdapter::new(node, &config));
        let cache = Arc::new(CompactBlockCache::new(config.cache_capacity));
        let engine = RangeStreamEngine::new(
            Arc::clone(&node),
            Arc::clone(&cache),
            StreamPolicy::from_config(&config),
        );
        Self {
            config,
            node,
            cache,
            engine,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// Node adapter.
    pub fn node(&self) -> &NodeAdapter<N> {
        &self.node
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    async fn compact_canonical(
        &self,
        height: u64,
        expected: Option<BlockHash>,
    ) -> Result<Arc<CompactBlock>, StreamerError> {
        let hash = self.node.canonical_hash(height).await?;
        if expected.is_some_and(|wanted| wanted != hash) {
            return Err(StreamerError::Reorganized { height });
        }
        let node = Arc::clone(&self.node);
        self.cache
            .get_or_populate(height, hash, || async move {
                let full = node.block_by_hash(height, hash).await?;
                compact(&full)
            })
            .await
    }

    fn require_taddr(&self, method: &str) -> Result<(), StreamerError> {
        if !self.config.taddr_support {
            return Err(StreamerError::MethodNotFound(format!(
                "{} (transparent address support is off)",
                method
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<N: FullNodeConnection + 'static> CompactTxStreamer for CompactStreamerService<N> {
    async fn get_latest_block(&self, chain: ChainSpec) -> Result<BlockId, StreamerError> {
        chain.check(self.config.network)?;
        let tip = self.node.chain_tip().await?;
        debug!("[cs] Latest block {} at {}", tip.hash, tip.height);
        Ok(BlockId::exact(tip.height, tip.hash))
    }

    async fn get_block(&self, id: BlockId) -> Result<Arc<CompactBlock>, StreamerError> {
        id.validate()?;
        if let Some(height) = id.height {
            return self.compact_canonical(height, id.hash).await;
        }

        // Hash only: the block may sit on a branch the node no longer follows.
        let full = self.node.block_at(&id).await?;
        let canonical = match self.node.canonical_hash(full.height).await {
            Ok(hash) => hash == full.hash,
            Err(StreamerError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };
        if canonical {
            let (height, hash) = (full.height, full.hash);
            self.cache
                .get_or_populate(height, hash, || async move { compact(&full) })
                .await
        } else {
            debug!("[cs] Serving non-canonical block {} uncached", full.hash);
            compact(&full).map(Arc::new)
        }
    }

    async fn get_block_range(&self, range: BlockRange) -> Result<CompactBlockStream, StreamerError> {
        self.engine.open(&range, CancellationToken::new()).await
    }

    async fn open_block_range(
        &self,
        range: BlockRange,
        cancel: CancellationToken,
    ) -> Result<CompactBlockStream, StreamerError> {
        self.engine.open(&range, cancel).await
    }

    async fn get_transaction(&self, filter: TxFilter) -> Result<RawTransaction, StreamerError> {
        self.node.raw_tx(&filter).await
    }

    async fn send_transaction(&self, tx: RawTransaction) -> Result<SendResponse, StreamerError> {
        self.node.submit_tx(&tx.data).await
    }

    async fn get_tree_state(&self, id: BlockId) -> Result<TreeState, StreamerError> {
        let mut state = match (id.height, id.hash) {
            (Some(height), expected) => {
                let state = self.node.tree_state(BlockLookup::Height(height)).await?;
                if expected.is_some_and(|hash| hash != state.hash) {
                    return Err(StreamerError::Reorganized { height });
                }
                state
            }
            (None, Some(hash)) => self.node.tree_state(BlockLookup::Hash(hash)).await?,
            (None, None) => {
                return Err(StreamerError::InvalidArgument(
                    "block id needs a height or a hash".to_string(),
                ))
            }
        };
        state.network = self.config.network.chain_name().to_string();
        Ok(state)
    }

    async fn get_address_utxos(
        &self,
        arg: GetAddressUtxosArg,
    ) -> Result<Vec<AddressUtxo>, StreamerError> {
        self.require_taddr("GetAddressUtxos")?;
        arg.validate()?;
        let mut utxos = self.node.address_utxos(&arg.addresses).await?;
        utxos.retain(|u| u.height >= arg.start_height);
        if arg.max_entries > 0 {
            utxos.truncate(arg.max_entries as usize);
        }
        debug!(
            "[cs] {} utxos for {} addresses",
            utxos.len(),
            arg.addresses.len()
        );
        Ok(utxos)
    }

    async fn get_taddress_txids(
        &self,
        filter: TransparentAddressBlockFilter,
    ) -> Result<Vec<RawTransaction>, StreamerError> {
        self.require_taddr("GetTaddressTxids")?;
        let (start, end) = filter.heights()?;
        self.node
            .address_transactions(&filter.address, start, end)
            .await
    }

    async fn get_lightd_info(&self) -> Result<LightdInfo, StreamerError> {
        let info = self.node.node_info().await?;
        Ok(LightdInfo {
            version: crate::VERSION.to_string(),
            vendor: self.config.vendor.clone(),
            taddr_support: self.config.taddr_support,
            chain_name: info.chain_name,
            sapling_activation_height: self.config.sapling_activation(),
            consensus_branch_id: info.consensus_branch_id,
            block_height: info.block_height,
            estimated_height: info.estimated_height,
            node_build: info.build,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockFullNode;
    use crate::domain::{Hash32, Network};
    use futures::StreamExt;

    fn service(tip: u64) -> (MockFullNode, CompactStreamerService<MockFullNode>) {
        let node = MockFullNode::with_chain(tip);
        let service = CompactStreamerService::new(node.clone(), StreamerConfig::for_testing());
        (node, service)
    }

    #[tokio::test]
    async fn test_latest_block_is_tip() {
        let (node, service) = service(20);
        let id = service.get_latest_block(ChainSpec::default()).await.unwrap();
        assert_eq!(id.height, Some(20));
        assert_eq!(id.hash, node.hash_at(20));
    }

    #[tokio::test]
    async fn test_latest_block_is_not_cached() {
        let (node, service) = service(20);
        service.get_latest_block(ChainSpec::default()).await.unwrap();
        node.extend(2);
        let id = service.get_latest_block(ChainSpec::default()).await.unwrap();
        assert_eq!(id.height, Some(22));
    }

    #[tokio::test]
    async fn test_wrong_chain_rejected() {
        let (_node, service) = service(5);
        let err = service
            .get_latest_block(ChainSpec::for_network(Network::Main))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_get_block_goes_through_cache() {
        let (node, service) = service(10);
        let first = service.get_block(BlockId::at_height(4)).await.unwrap();
        let second = service.get_block(BlockId::at_height(4)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(node.block_fetches(), 1);
        assert_eq!(service.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn test_get_block_with_stale_hash_is_reorganized() {
        let (_node, service) = service(10);
        let err = service
            .get_block(BlockId::exact(4, Hash32([0xaa; 32])))
            .await
            .unwrap_err();
        assert_eq!(err, StreamerError::Reorganized { height: 4 });
    }

    #[tokio::test]
    async fn test_get_block_of_orphaned_hash_is_uncached() {
        let (node, service) = service(10);
        let stale = node.hash_at(8).unwrap();
        node.reorg_from(8);
        let block = service.get_block(BlockId::with_hash(stale)).await.unwrap();
        assert_eq!(block.hash, stale);
        assert_eq!(service.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_get_block_above_tip_not_found() {
        let (_node, service) = service(10);
        assert!(matches!(
            service.get_block(BlockId::at_height(11)).await,
            Err(StreamerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_block_id_rejected() {
        let (_node, service) = service(10);
        assert!(matches!(
            service.get_block(BlockId::default()).await,
            Err(StreamerError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_block_range_through_trait() {
        let (_node, service) = service(10);
        let heights: Vec<u64> = service
            .get_block_range(BlockRange::heights(3, 6))
            .await
            .unwrap()
            .map(|item| item.unwrap().height)
            .collect()
            .await;
        assert_eq!(heights, vec![3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_transaction_not_found() {
        let (_node, service) = service(3);
        let err = service
            .get_transaction(TxFilter::Hash(Hash32([0x42; 32])))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_tree_state_names_served_chain() {
        let (node, service) = service(12);
        let state = service.get_tree_state(BlockId::at_height(9)).await.unwrap();
        assert_eq!(state.network, "regtest");
        assert_eq!(state.hash, node.hash_at(9).unwrap());

        let by_hash = service
            .get_tree_state(BlockId::with_hash(state.hash))
            .await
            .unwrap();
        assert_eq!(by_hash, state);
    }

    #[tokio::test]
    async fn test_tree_state_with_stale_hash_is_reorganized() {
        let (_node, service) = service(12);
        let err = service
            .get_tree_state(BlockId::exact(9, Hash32([0x11; 32])))
            .await
            .unwrap_err();
        assert_eq!(err, StreamerError::Reorganized { height: 9 });
    }

    #[tokio::test]
    async fn test_address_utxos_filtered_and_capped() {
        let (node, service) = service(12);
        let addresses: Vec<String> = [3, 5, 8]
            .into_iter()
            .map(|h| node.miner_address(h).unwrap())
            .collect();

        let all = service
            .get_address_utxos(GetAddressUtxosArg {
                addresses: addresses.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.iter().map(|u| u.height).collect::<Vec<_>>(), vec![3, 5, 8]);

        let recent = service
            .get_address_utxos(GetAddressUtxosArg {
                addresses: addresses.clone(),
                start_height: 4,
                max_entries: 1,
            })
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].height, 5);
    }

    #[tokio::test]
    async fn test_address_queries_off_without_taddr_support() {
        let node = MockFullNode::with_chain(5);
        let config = StreamerConfig {
            taddr_support: false,
            ..StreamerConfig::for_testing()
        };
        let service = CompactStreamerService::new(node.clone(), config);
        let err = service
            .get_address_utxos(GetAddressUtxosArg {
                addresses: vec![node.miner_address(1).unwrap()],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StreamerError::MethodNotFound(_)));
        assert!(!service.get_lightd_info().await.unwrap().taddr_support);
    }

    #[tokio::test]
    async fn test_taddress_txids_in_range() {
        let (node, service) = service(12);
        let address = node.miner_address(7).unwrap();
        let filter = |start, end| TransparentAddressBlockFilter {
            address: address.clone(),
            range: BlockRange::heights(start, end),
        };
        let hits = service.get_taddress_txids(filter(5, 9)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].height, 7);
        assert!(service.get_taddress_txids(filter(8, 12)).await.unwrap().is_empty());
        assert!(matches!(
            service.get_taddress_txids(filter(9, 5)).await,
            Err(StreamerError::InvalidRange(_))
        ));
    }

    #[tokio::test]
    async fn test_lightd_info() {
        let (_node, service) = service(12);
        let info = service.get_lightd_info().await.unwrap();
        assert_eq!(info.block_height, 12);
        assert_eq!(info.chain_name, "regtest");
        assert_eq!(info.sapling_activation_height, 1);
        assert_eq!(info.vendor, "CompactStreamer-test");
    }
}
