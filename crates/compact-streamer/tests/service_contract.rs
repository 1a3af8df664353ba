//! # Service Contract Tests
//!
//! Unary calls of the compact streamer against the mock node: block
//! lookups, compaction output, transaction lookup and relay, server info
//! and the wallet-restore queries.
//!
//! ## Test Categories
//!
//! 1. **Blocks** - tip, lookups by height and hash, cache reuse
//! 2. **Compaction** - determinism and shape of compact output
//! 3. **Transactions** - mined and mempool lookups, relay outcomes
//! 4. **Wallet restore** - tree state, transparent address queries
//! 5. **Routing** - JSON dispatch through the method router

use std::sync::Arc;

use compact_streamer::{
    codes, BlockId, BlockRange, ChainSpec, CompactStreamerService, CompactTxStreamer,
    GetAddressUtxosArg, Hash32, MethodRouter, MockFullNode, Network, RawTransaction, Reply,
    StreamerConfig, StreamerError, TransparentAddressBlockFilter, TxFilter, COMPACT_NOTE_SIZE,
    RPC_DESERIALIZATION_ERROR,
};
use futures::StreamExt;
use serde_json::json;

// =============================================================================
// TEST HELPERS
// =============================================================================

fn make_service(tip: u64) -> (MockFullNode, Arc<CompactStreamerService<MockFullNode>>) {
    let node = MockFullNode::with_chain(tip);
    let service = CompactStreamerService::new(node.clone(), StreamerConfig::for_testing());
    (node, Arc::new(service))
}

// =============================================================================
// BLOCKS
// =============================================================================

#[tokio::test]
async fn test_latest_block_matches_node_tip() {
    let (node, service) = make_service(42);
    let id = service
        .get_latest_block(ChainSpec::for_network(Network::Regtest))
        .await
        .unwrap();
    assert_eq!(id, BlockId::exact(42, node.hash_at(42).unwrap()));
}

#[tokio::test]
async fn test_block_by_hash_matches_block_by_height() {
    let (node, service) = make_service(20);
    let by_height = service.get_block(BlockId::at_height(9)).await.unwrap();
    let by_hash = service
        .get_block(BlockId::with_hash(node.hash_at(9).unwrap()))
        .await
        .unwrap();
    assert_eq!(*by_height, *by_hash);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let (node, service) = make_service(20);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.get_block(BlockId::at_height(11)).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().height, 11);
    }
    assert_eq!(node.block_fetches(), 1);
}

#[tokio::test]
async fn test_block_after_reorg_is_new_branch() {
    let (node, service) = make_service(20);
    let before = service.get_block(BlockId::at_height(18)).await.unwrap();
    node.reorg_from(17);
    let after = service.get_block(BlockId::at_height(18)).await.unwrap();
    assert_ne!(before.hash, after.hash);
    assert_eq!(after.hash, node.hash_at(18).unwrap());
}

#[tokio::test]
async fn test_node_outage_is_transient_error() {
    let (node, service) = make_service(20);
    node.set_unavailable(true);
    let err = service.get_block(BlockId::at_height(3)).await.unwrap_err();
    assert!(err.is_transient());
    node.set_unavailable(false);
    assert!(service.get_block(BlockId::at_height(3)).await.is_ok());
}

#[tokio::test]
async fn test_corrupt_block_is_not_served() {
    let (node, service) = make_service(20);
    node.corrupt_block(5);
    let err = service.get_block(BlockId::at_height(5)).await.unwrap_err();
    assert!(matches!(err, StreamerError::CorruptInput(_)));
    assert_eq!(service.cache_stats().entries, 0);
}

// =============================================================================
// COMPACTION
// =============================================================================

#[tokio::test]
async fn test_compact_block_shape() {
    let (node, service) = make_service(10);
    let block = service.get_block(BlockId::at_height(6)).await.unwrap();
    let full = node.full_block_at(6).unwrap();

    assert_eq!(block.hash, full.hash);
    assert_eq!(block.prev_hash, full.prev_hash);
    assert_eq!(block.time, full.time);
    assert_eq!(block.vtx.len(), 2);

    let coinbase = &block.vtx[0];
    assert_eq!(coinbase.index, 0);
    assert!(coinbase.vin.is_empty());
    assert_eq!(coinbase.vout.len(), 1);

    let shielded = &block.vtx[1];
    assert_eq!(shielded.index, 1);
    assert_eq!(shielded.spends.len(), 1);
    assert_eq!(shielded.outputs[0].ciphertext.len(), COMPACT_NOTE_SIZE);
    assert_eq!(shielded.actions[0].ciphertext.len(), COMPACT_NOTE_SIZE);
    assert_eq!(shielded.vin.len(), 1);
}

#[tokio::test]
async fn test_compaction_is_deterministic_across_services() {
    let node = MockFullNode::with_chain(10);
    let a = CompactStreamerService::new(node.clone(), StreamerConfig::for_testing());
    let b = CompactStreamerService::new(node.clone(), StreamerConfig::for_testing());
    let from_a = a.get_block(BlockId::at_height(7)).await.unwrap();
    let from_b = b.get_block(BlockId::at_height(7)).await.unwrap();
    assert_eq!(*from_a, *from_b);
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

#[tokio::test]
async fn test_mined_transaction_by_hash_and_position_agree() {
    let (node, service) = make_service(10);
    let full = node.full_block_at(4).unwrap();
    let txid = full.transactions[1].txid;

    let by_hash = service.get_transaction(TxFilter::Hash(txid)).await.unwrap();
    let by_position = service
        .get_transaction(TxFilter::Position {
            block: BlockId::at_height(4),
            index: 1,
        })
        .await
        .unwrap();

    assert_eq!(by_hash, by_position);
    assert_eq!(by_hash.height, 4);
    assert_eq!(by_hash.data, full.transactions[1].raw);
}

#[tokio::test]
async fn test_position_past_end_of_block_not_found() {
    let (_node, service) = make_service(10);
    let err = service
        .get_transaction(TxFilter::Position {
            block: BlockId::at_height(4),
            index: 9,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StreamerError::NotFound(_)));
    assert_eq!(err.error_code(), codes::RESOURCE_NOT_FOUND);
}

#[tokio::test]
async fn test_sent_transaction_is_found_in_mempool() {
    let (node, service) = make_service(10);
    let data = MockFullNode::sample_tx_bytes(3);
    let response = service
        .send_transaction(RawTransaction::unmined(data.clone()))
        .await
        .unwrap();
    assert!(response.is_accepted());
    assert_eq!(node.submissions(), 1);

    let txid = Hash32::from_display_hex(&response.error_message).unwrap();
    let found = service.get_transaction(TxFilter::Hash(txid)).await.unwrap();
    assert_eq!(found.data, data);
    assert_eq!(found.height, 0);
}

#[tokio::test]
async fn test_malformed_transaction_is_rejected_response() {
    let (_node, service) = make_service(10);
    let response = service
        .send_transaction(RawTransaction::unmined(vec![0xde, 0xad]))
        .await
        .unwrap();
    assert!(!response.is_accepted());
    assert_eq!(response.error_code, RPC_DESERIALIZATION_ERROR);
}

#[tokio::test]
async fn test_empty_transaction_never_reaches_node() {
    let (node, service) = make_service(10);
    let response = service
        .send_transaction(RawTransaction::unmined(Vec::new()))
        .await
        .unwrap();
    assert_eq!(response.error_code, RPC_DESERIALIZATION_ERROR);
    assert_eq!(node.submissions(), 0);
}

#[tokio::test]
async fn test_resubmitting_mined_transaction_is_rejected() {
    let (node, service) = make_service(10);
    let raw = node.full_block_at(2).unwrap().transactions[1].raw.clone();
    let response = service
        .send_transaction(RawTransaction::unmined(raw))
        .await
        .unwrap();
    assert_eq!(response.error_code, -27);
}

// =============================================================================
// WALLET RESTORE
// =============================================================================

#[tokio::test]
async fn test_tree_state_follows_reorg() {
    let (node, service) = make_service(15);
    let before = service.get_tree_state(BlockId::at_height(12)).await.unwrap();
    node.reorg_from(10);
    let after = service.get_tree_state(BlockId::at_height(12)).await.unwrap();
    assert_ne!(before.hash, after.hash);
    assert_ne!(before.sapling_tree, after.sapling_tree);

    // The replaced block is still addressable by its hash.
    let stale = service
        .get_tree_state(BlockId::with_hash(before.hash))
        .await
        .unwrap();
    assert_eq!(stale, before);
}

#[tokio::test]
async fn test_tree_state_above_tip_not_found() {
    let (_node, service) = make_service(5);
    let err = service
        .get_tree_state(BlockId::at_height(6))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), codes::RESOURCE_NOT_FOUND);
}

#[tokio::test]
async fn test_utxos_then_history_for_same_address() {
    let (node, service) = make_service(20);
    let address = node.miner_address(11).unwrap();

    let utxos = service
        .get_address_utxos(GetAddressUtxosArg {
            addresses: vec![address.clone()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(utxos.len(), 1);
    let funding = service
        .get_transaction(TxFilter::Hash(utxos[0].txid))
        .await
        .unwrap();

    let history = service
        .get_taddress_txids(TransparentAddressBlockFilter {
            address,
            range: BlockRange::heights(0, 20),
        })
        .await
        .unwrap();
    assert_eq!(history, vec![funding]);
}

#[tokio::test]
async fn test_blank_address_rejected() {
    let (node, service) = make_service(5);
    let err = service
        .get_address_utxos(GetAddressUtxosArg {
            addresses: vec![" ".to_string()],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), codes::INVALID_PARAMS);
    assert_eq!(node.block_fetches(), 0);
}

// =============================================================================
// ROUTING
// =============================================================================

#[tokio::test]
async fn test_router_streams_range_as_json_blocks() {
    let (_node, service) = make_service(30);
    let router = MethodRouter::new(service);
    let reply = router
        .dispatch(
            "GetBlockRange",
            json!({"start": {"height": 25}, "end": {"height": 40}}),
        )
        .await
        .unwrap();
    let Reply::Stream(stream) = reply else {
        panic!("expected a stream");
    };
    let heights: Vec<u64> = stream.map(|b| b.unwrap().height).collect().await;
    assert_eq!(heights, (25..=30).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_router_lightd_info() {
    let (_node, service) = make_service(30);
    let router = MethodRouter::new(service);
    let Reply::Unary(info) = router.dispatch("GetLightdInfo", json!(null)).await.unwrap() else {
        panic!("expected a unary reply");
    };
    assert_eq!(info["chain_name"], "regtest");
    assert_eq!(info["block_height"], 30);
    assert_eq!(info["taddr_support"], true);
}

#[tokio::test]
async fn test_router_transaction_by_hash_json() {
    let (node, service) = make_service(8);
    let txid = node.full_block_at(3).unwrap().transactions[0].txid;
    let router = MethodRouter::new(service);
    let Reply::Unary(tx) = router
        .dispatch("GetTransaction", json!({"hash": txid.to_string()}))
        .await
        .unwrap()
    else {
        panic!("expected a unary reply");
    };
    assert_eq!(tx["height"], 3);
}
