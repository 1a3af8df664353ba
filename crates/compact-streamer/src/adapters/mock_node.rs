//! Mock Full Node
//!
//! In-memory chain for tests: deterministic sha2-linked blocks, reorgs,
//! a mempool, failure injection and call counters.
//!
//! Every coinbase pays a fresh P2PKH script; its address is `tm` plus the
//! hex key hash (see [`MockFullNode::miner_address`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::domain::{
    AddressUtxo, BlockHash, BlockHeight, BlockLookup, ChainTip, FullBlock, FullTransaction,
    Hash32, NodeInfo, OrchardAction, RawTransaction, SaplingOutput, SaplingSpend, StreamerError,
    SubmitOutcome, TransparentInput, TransparentOutput, TreeState, TxId,
};
use crate::ports::outbound::FullNodeConnection;

/// Leading bytes every transaction the mock accepts must carry.
pub const MOCK_TX_HEADER: [u8; 4] = [0x05, 0x00, 0x00, 0x80];

const GENESIS_TIME: u32 = 1_477_641_360;
const BLOCK_SPACING: u32 = 75;

#[derive(Default)]
struct MockState {
    chain: Vec<FullBlock>,
    detached: HashMap<BlockHash, FullBlock>,
    mempool: HashMap<TxId, Vec<u8>>,
    branch: u32,
    fail_next: u32,
    unavailable: bool,
    latency: Duration,
}

impl MockState {
    fn check_available(&mut self, node: &str) -> Result<(), StreamerError> {
        if self.unavailable {
            return Err(StreamerError::NodeUnavailable(format!("{} is down", node)));
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(StreamerError::NodeUnavailable(format!(
                "{} connection reset",
                node
            )));
        }
        Ok(())
    }

    fn find(&self, lookup: BlockLookup) -> Option<&FullBlock> {
        match lookup {
            BlockLookup::Height(h) => self.chain.get(h as usize),
            BlockLookup::Hash(hash) => self
                .chain
                .iter()
                .find(|b| b.hash == hash)
                .or_else(|| self.detached.get(&hash)),
        }
    }

    fn push_block(&mut self) {
        let height = self.chain.len() as BlockHeight;
        let prev_hash = self.chain.last().map(|b| b.hash).unwrap_or(Hash32::ZERO);
        let block = synthetic_block(height, prev_hash, self.branch);
        self.chain.push(block);
    }
}

/// Mock full node for testing. Clones share one chain.
#[derive(Clone)]
pub struct MockFullNode {
    id: String,
    state: Arc<RwLock<MockState>>,
    block_fetches: Arc<AtomicUsize>,
    hash_lookups: Arc<AtomicUsize>,
    submissions: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// Marks one call as in flight until dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MockFullNode {
    fn default() -> Self {
        Self::with_chain(0)
    }
}

impl MockFullNode {
    /// Chain holding genesis through `tip`.
    pub fn with_chain(tip: BlockHeight) -> Self {
        let node = Self {
            id: "mock-node-1".to_string(),
            state: Arc::new(RwLock::new(MockState::default())),
            block_fetches: Arc::new(AtomicUsize::new(0)),
            hash_lookups: Arc::new(AtomicUsize::new(0)),
            submissions: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        };
        {
            let mut state = node.state.write();
            for _ in 0..=tip {
                state.push_block();
            }
        }
        node
    }

    /// Mine `count` more blocks on the current branch.
    pub fn extend(&self, count: u64) {
        let mut state = self.state.write();
        for _ in 0..count {
            state.push_block();
        }
    }

    /// Replace every block from `height` up with a new branch of the same length.
    ///
    /// Replaced blocks stay fetchable by hash, as on a real node.
    pub fn reorg_from(&self, height: BlockHeight) {
        let mut state = self.state.write();
        let tip_len = state.chain.len();
        let keep = (height as usize).min(tip_len);
        let replaced: Vec<FullBlock> = state.chain.drain(keep..).collect();
        for block in replaced {
            state.detached.insert(block.hash, block);
        }
        state.branch += 1;
        while state.chain.len() < tip_len {
            state.push_block();
        }
    }

    /// Fail the next `n` calls with `NodeUnavailable`.
    pub fn fail_next(&self, n: u32) {
        self.state.write().fail_next = n;
    }

    /// Fail every call until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.state.write().latency = latency;
    }

    /// Truncate the first Sapling ciphertext in the block at `height`.
    pub fn corrupt_block(&self, height: BlockHeight) {
        let mut state = self.state.write();
        if let Some(block) = state.chain.get_mut(height as usize) {
            for tx in &mut block.transactions {
                if let Some(output) = tx.sapling_outputs.first_mut() {
                    output.enc_ciphertext.truncate(10);
                    return;
                }
            }
        }
    }

    /// Add a transaction to the mempool directly.
    pub fn insert_mempool_tx(&self, data: Vec<u8>) -> TxId {
        let txid = txid_of(&data);
        self.state.write().mempool.insert(txid, data);
        txid
    }

    /// Canonical hash at `height`, bypassing counters and failures.
    pub fn hash_at(&self, height: BlockHeight) -> Option<BlockHash> {
        self.state.read().chain.get(height as usize).map(|b| b.hash)
    }

    /// Canonical full block at `height`, bypassing counters and failures.
    pub fn full_block_at(&self, height: BlockHeight) -> Option<FullBlock> {
        self.state.read().chain.get(height as usize).cloned()
    }

    /// Current tip height.
    pub fn tip_height(&self) -> BlockHeight {
        (self.state.read().chain.len() as BlockHeight).saturating_sub(1)
    }

    /// Number of `block` calls served.
    pub fn block_fetches(&self) -> usize {
        self.block_fetches.load(Ordering::SeqCst)
    }

    /// Number of `block_hash` calls served.
    pub fn hash_lookups(&self) -> usize {
        self.hash_lookups.load(Ordering::SeqCst)
    }

    /// Number of `send_raw_transaction` calls that reached the node.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Most calls ever in progress at once, latency included.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Address the coinbase at `height` pays.
    pub fn miner_address(&self, height: BlockHeight) -> Option<String> {
        let state = self.state.read();
        let coinbase = state.chain.get(height as usize)?.transactions.first()?;
        coinbase
            .outputs
            .first()
            .and_then(|o| address_of(&o.script_pub_key))
    }

    /// Well-formed transaction bytes the mock accepts.
    pub fn sample_tx_bytes(seed: u8) -> Vec<u8> {
        let mut data = MOCK_TX_HEADER.to_vec();
        data.extend_from_slice(&[seed; 60]);
        data
    }

    async fn enter(&self) -> Result<InFlight, StreamerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let call = InFlight(Arc::clone(&self.in_flight));

        let latency = self.state.read().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.state.write().check_available(&self.id)?;
        Ok(call)
    }
}

#[async_trait]
impl FullNodeConnection for MockFullNode {
    async fn chain_tip(&self) -> Result<ChainTip, StreamerError> {
        let _call = self.enter().await?;
        let state = self.state.read();
        let tip = state
            .chain
            .last()
            .ok_or_else(|| StreamerError::NotFound("empty chain".to_string()))?;
        Ok(ChainTip {
            height: tip.height,
            hash: tip.hash,
        })
    }

    async fn block_hash(&self, height: BlockHeight) -> Result<BlockHash, StreamerError> {
        let _call = self.enter().await?;
        self.hash_lookups.fetch_add(1, Ordering::SeqCst);
        self.state
            .read()
            .chain
            .get(height as usize)
            .map(|b| b.hash)
            .ok_or_else(|| StreamerError::NotFound(format!("block height {}", height)))
    }

    async fn block(&self, lookup: BlockLookup) -> Result<FullBlock, StreamerError> {
        let _call = self.enter().await?;
        self.block_fetches.fetch_add(1, Ordering::SeqCst);
        self.state
            .read()
            .find(lookup)
            .cloned()
            .ok_or_else(|| StreamerError::NotFound(format!("block {}", lookup)))
    }

    async fn raw_transaction(&self, txid: &TxId) -> Result<RawTransaction, StreamerError> {
        let _call = self.enter().await?;
        let state = self.state.read();
        if let Some(data) = state.mempool.get(txid) {
            return Ok(RawTransaction::unmined(data.clone()));
        }
        state
            .chain
            .iter()
            .find_map(|block| {
                block
                    .transactions
                    .iter()
                    .find(|tx| tx.txid == *txid)
                    .map(|tx| RawTransaction {
                        data: tx.raw.clone(),
                        height: block.height,
                    })
            })
            .ok_or_else(|| StreamerError::NotFound(format!("transaction {}", txid)))
    }

    async fn send_raw_transaction(&self, data: &[u8]) -> Result<SubmitOutcome, StreamerError> {
        let _call = self.enter().await?;
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if !data.starts_with(&MOCK_TX_HEADER) || data.len() <= MOCK_TX_HEADER.len() {
            return Ok(SubmitOutcome::Rejected {
                code: -22,
                message: "TX decode failed".to_string(),
            });
        }
        let txid = txid_of(data);
        let mut state = self.state.write();
        let mined = state
            .chain
            .iter()
            .any(|b| b.transactions.iter().any(|tx| tx.txid == txid));
        if mined {
            return Ok(SubmitOutcome::Rejected {
                code: -27,
                message: "transaction already in block chain".to_string(),
            });
        }
        state.mempool.insert(txid, data.to_vec());
        Ok(SubmitOutcome::Accepted(txid))
    }

    async fn tree_state(&self, lookup: BlockLookup) -> Result<TreeState, StreamerError> {
        let _call = self.enter().await?;
        let state = self.state.read();
        let block = state
            .find(lookup)
            .ok_or_else(|| StreamerError::NotFound(format!("block {}", lookup)))?;
        let frontier = |tag: &[u8]| {
            if block.height == 0 {
                String::new()
            } else {
                hex::encode(sha256(&[tag, block.hash.as_bytes()]))
            }
        };
        Ok(TreeState {
            network: String::new(),
            height: block.height,
            hash: block.hash,
            time: block.time,
            sapling_tree: frontier(b"sapling-tree"),
            orchard_tree: frontier(b"orchard-tree"),
        })
    }

    async fn address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, StreamerError> {
        let _call = self.enter().await?;
        let state = self.state.read();
        let mut utxos = Vec::new();
        for block in &state.chain {
            for tx in &block.transactions {
                for (index, output) in tx.outputs.iter().enumerate() {
                    let Some(address) = address_of(&output.script_pub_key) else {
                        continue;
                    };
                    if addresses.contains(&address) {
                        utxos.push(AddressUtxo {
                            address,
                            txid: tx.txid,
                            index: index as u32,
                            script: output.script_pub_key.clone(),
                            value_zat: output.value,
                            height: block.height,
                        });
                    }
                }
            }
        }
        Ok(utxos)
    }

    async fn address_txids(
        &self,
        address: &str,
        start: BlockHeight,
        end: BlockHeight,
    ) -> Result<Vec<TxId>, StreamerError> {
        let _call = self.enter().await?;
        let state = self.state.read();
        let txids = state
            .chain
            .iter()
            .filter(|b| (start..=end).contains(&b.height))
            .flat_map(|b| &b.transactions)
            .filter(|tx| {
                tx.outputs
                    .iter()
                    .any(|o| address_of(&o.script_pub_key).as_deref() == Some(address))
            })
            .map(|tx| tx.txid)
            .collect();
        Ok(txids)
    }

    async fn node_info(&self) -> Result<NodeInfo, StreamerError> {
        let _call = self.enter().await?;
        let height = self.tip_height();
        Ok(NodeInfo {
            build: "v5.9.0-mock".to_string(),
            chain_name: "regtest".to_string(),
            block_height: height,
            estimated_height: height,
            consensus_branch_id: "c2d6d0b4".to_string(),
        })
    }

    fn node_id(&self) -> &str {
        &self.id
    }
}

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn txid_of(data: &[u8]) -> TxId {
    Hash32(sha256(&[b"tx", data]))
}

/// Mock address for a P2PKH script.
fn address_of(script: &[u8]) -> Option<String> {
    match script {
        [0x76, 0xa9, 0x14, key_hash @ .., 0x88, 0xac] if key_hash.len() == 20 => {
            Some(format!("tm{}", hex::encode(key_hash)))
        }
        _ => None,
    }
}

fn synthetic_block(height: BlockHeight, prev_hash: BlockHash, branch: u32) -> FullBlock {
    let hash = Hash32(sha256(&[
        b"block",
        &height.to_le_bytes(),
        prev_hash.as_bytes(),
        &branch.to_le_bytes(),
    ]));
    let seed = |tag: &[u8]| sha256(&[tag, hash.as_bytes()]);

    let mut coinbase_raw = MOCK_TX_HEADER.to_vec();
    coinbase_raw.extend_from_slice(&seed(b"coinbase"));
    let coinbase = FullTransaction {
        txid: txid_of(&coinbase_raw),
        raw: coinbase_raw,
        inputs: vec![TransparentInput::Coinbase],
        outputs: vec![TransparentOutput {
            value: 312_500_000,
            script_pub_key: [&[0x76u8, 0xa9, 0x14][..], &seed(b"miner")[..20], &[0x88u8, 0xac][..]]
                .concat(),
        }],
        sapling_spends: vec![],
        sapling_outputs: vec![],
        orchard_actions: vec![],
    };

    let mut shielded_raw = MOCK_TX_HEADER.to_vec();
    shielded_raw.extend_from_slice(&seed(b"shielded"));
    let ciphertext: Vec<u8> = seed(b"enc").iter().copied().cycle().take(580).collect();
    let shielded = FullTransaction {
        txid: txid_of(&shielded_raw),
        raw: shielded_raw,
        inputs: vec![TransparentInput::Prevout {
            txid: Hash32(seed(b"prevout")),
            index: 0,
            script_sig: vec![0x47; 72],
        }],
        outputs: vec![],
        sapling_spends: vec![SaplingSpend {
            nullifier: seed(b"sapling-nf").to_vec(),
        }],
        sapling_outputs: vec![SaplingOutput {
            cmu: seed(b"cmu").to_vec(),
            ephemeral_key: seed(b"epk").to_vec(),
            enc_ciphertext: ciphertext.clone(),
        }],
        orchard_actions: vec![OrchardAction {
            nullifier: seed(b"orchard-nf").to_vec(),
            cmx: seed(b"cmx").to_vec(),
            ephemeral_key: seed(b"orchard-epk").to_vec(),
            enc_ciphertext: ciphertext,
        }],
    };

    FullBlock {
        height,
        hash,
        prev_hash,
        time: GENESIS_TIME + (height as u32).wrapping_mul(BLOCK_SPACING),
        transactions: vec![coinbase, shielded],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chain_is_linked() {
        let node = MockFullNode::with_chain(5);
        for h in 1..=5 {
            let block = node.block(BlockLookup::Height(h)).await.unwrap();
            assert_eq!(block.prev_hash, node.hash_at(h - 1).unwrap());
        }
        assert_eq!(node.block_fetches(), 5);
    }

    #[tokio::test]
    async fn test_reorg_keeps_tip_height_and_changes_hashes() {
        let node = MockFullNode::with_chain(10);
        let old = node.hash_at(7).unwrap();
        let kept = node.hash_at(6).unwrap();
        node.reorg_from(7);
        assert_eq!(node.tip_height(), 10);
        assert_ne!(node.hash_at(7).unwrap(), old);
        assert_eq!(node.hash_at(6).unwrap(), kept);
        // Old branch is still reachable by hash.
        let stale = node.block(BlockLookup::Hash(old)).await.unwrap();
        assert_eq!(stale.height, 7);
    }

    #[tokio::test]
    async fn test_unavailable_node() {
        let node = MockFullNode::with_chain(1);
        node.set_unavailable(true);
        assert!(node.chain_tip().await.unwrap_err().is_transient());
        node.set_unavailable(false);
        assert!(node.chain_tip().await.is_ok());
    }

    #[tokio::test]
    async fn test_mempool_and_mined_lookup() {
        let node = MockFullNode::with_chain(3);
        let txid = node.insert_mempool_tx(MockFullNode::sample_tx_bytes(9));
        assert_eq!(node.raw_transaction(&txid).await.unwrap().height, 0);

        let mined = node.full_block_at(2).unwrap().transactions[1].txid;
        assert_eq!(node.raw_transaction(&mined).await.unwrap().height, 2);
    }

    #[tokio::test]
    async fn test_in_flight_peak_tracks_overlap() {
        let node = MockFullNode::with_chain(3);
        node.set_latency(Duration::from_millis(5));
        let (a, b, c) = tokio::join!(node.block_hash(1), node.block_hash(2), node.chain_tip());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(node.peak_in_flight(), 3);
        node.block_hash(1).await.unwrap();
        assert_eq!(node.peak_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_coinbase_pays_miner_address() {
        let node = MockFullNode::with_chain(4);
        let address = node.miner_address(2).unwrap();
        assert!(address.starts_with("tm"));
        assert_ne!(node.miner_address(3), Some(address.clone()));

        let utxos = node.address_utxos(&[address.clone()]).await.unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].height, 2);
        assert_eq!(utxos[0].value_zat, 312_500_000);

        let coinbase = node.full_block_at(2).unwrap().transactions[0].txid;
        assert_eq!(node.address_txids(&address, 0, 4).await.unwrap(), vec![coinbase]);
        assert!(node.address_txids(&address, 3, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tree_state_empty_at_genesis() {
        let node = MockFullNode::with_chain(2);
        let genesis = node.tree_state(BlockLookup::Height(0)).await.unwrap();
        assert!(genesis.sapling_tree.is_empty());
        let later = node.tree_state(BlockLookup::Height(2)).await.unwrap();
        assert_eq!(later.hash, node.hash_at(2).unwrap());
        assert_eq!(later.sapling_tree.len(), 64);
        assert!(matches!(
            node.tree_state(BlockLookup::Height(3)).await,
            Err(StreamerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_send_rejects_undecodable_bytes() {
        let node = MockFullNode::with_chain(1);
        let outcome = node.send_raw_transaction(&[1, 2, 3]).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Rejected { code: -22, .. }));
    }
}
