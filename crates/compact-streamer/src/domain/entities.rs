//! # Domain Entities
//!
//! Full blocks as decoded from the node, the compact records served to
//! light clients, and the transaction/relay records.

use super::value_objects::{serde_hex, BlockHash, BlockHeight, TxId};
use serde::{Deserialize, Serialize};

/// Compact wire format version emitted by the compactor.
pub const PROTO_VERSION: u32 = 1;

// =============================================================================
// Full node data
// =============================================================================

/// Block as decoded from the full node.
///
/// Field lengths are not validated here; the compactor rejects
/// malformed content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullBlock {
    /// Block height.
    pub height: BlockHeight,
    /// Block hash.
    pub hash: BlockHash,
    /// Parent block hash.
    pub prev_hash: BlockHash,
    /// Header timestamp (unix seconds).
    pub time: u32,
    /// Transactions in block order.
    pub transactions: Vec<FullTransaction>,
}

/// Transaction as decoded from the full node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullTransaction {
    /// Transaction id.
    pub txid: TxId,
    /// Serialized transaction bytes.
    pub raw: Vec<u8>,
    /// Transparent inputs.
    pub inputs: Vec<TransparentInput>,
    /// Transparent outputs.
    pub outputs: Vec<TransparentOutput>,
    /// Sapling spend descriptions.
    pub sapling_spends: Vec<SaplingSpend>,
    /// Sapling output descriptions.
    pub sapling_outputs: Vec<SaplingOutput>,
    /// Orchard actions.
    pub orchard_actions: Vec<OrchardAction>,
}

impl FullTransaction {
    /// True when the compactor has nothing to summarise for this tx.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
            && self.outputs.is_empty()
            && self.sapling_spends.is_empty()
            && self.sapling_outputs.is_empty()
            && self.orchard_actions.is_empty()
    }
}

/// Transparent input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransparentInput {
    /// Coinbase input (no prevout).
    Coinbase,
    /// Spend of a previous output.
    Prevout {
        /// Funding transaction.
        txid: TxId,
        /// Output index within the funding transaction.
        index: u32,
        /// Unlocking script. Never forwarded to clients.
        script_sig: Vec<u8>,
    },
}

/// Transparent output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransparentOutput {
    /// Value in zatoshi.
    pub value: u64,
    /// Locking script.
    pub script_pub_key: Vec<u8>,
}

/// Sapling spend description (only the nullifier is kept).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaplingSpend {
    /// Nullifier, expected 32 bytes.
    pub nullifier: Vec<u8>,
}

/// Sapling output description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaplingOutput {
    /// Note commitment u-coordinate, expected 32 bytes.
    pub cmu: Vec<u8>,
    /// Ephemeral public key, expected 32 bytes.
    pub ephemeral_key: Vec<u8>,
    /// Full encrypted note ciphertext.
    pub enc_ciphertext: Vec<u8>,
}

/// Orchard action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchardAction {
    /// Nullifier, expected 32 bytes.
    pub nullifier: Vec<u8>,
    /// Note commitment x-coordinate, expected 32 bytes.
    pub cmx: Vec<u8>,
    /// Ephemeral public key, expected 32 bytes.
    pub ephemeral_key: Vec<u8>,
    /// Full encrypted note ciphertext.
    pub enc_ciphertext: Vec<u8>,
}

// =============================================================================
// Compact records
// =============================================================================

/// Minimal per-block summary sent to light clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactBlock {
    /// Wire format version.
    pub proto_version: u32,
    /// Block height.
    pub height: BlockHeight,
    /// Block hash.
    pub hash: BlockHash,
    /// Parent block hash.
    pub prev_hash: BlockHash,
    /// Header timestamp.
    pub time: u32,
    /// Summarised transactions, in block order.
    pub vtx: Vec<CompactTx>,
}

impl CompactBlock {
    /// Total (sapling outputs, orchard actions) in the block.
    pub fn output_counts(&self) -> (usize, usize) {
        self.vtx.iter().fold((0, 0), |(s, o), tx| {
            (s + tx.outputs.len(), o + tx.actions.len())
        })
    }
}

/// Per-transaction summary inside a [`CompactBlock`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactTx {
    /// Position of the transaction in the full block.
    pub index: u64,
    /// Transaction id.
    pub hash: TxId,
    /// Fee in zatoshi. Always 0: not computable without prevout values.
    pub fee: u32,
    /// Sapling nullifiers.
    pub spends: Vec<CompactSaplingSpend>,
    /// Sapling outputs.
    pub outputs: Vec<CompactSaplingOutput>,
    /// Orchard actions.
    pub actions: Vec<CompactOrchardAction>,
    /// Transparent prevouts.
    pub vin: Vec<CompactTxIn>,
    /// Transparent outputs.
    pub vout: Vec<TxOut>,
}

/// Sapling spend summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactSaplingSpend {
    /// Nullifier.
    #[serde(with = "serde_hex::array32")]
    pub nf: [u8; 32],
}

/// Sapling output summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactSaplingOutput {
    /// Note commitment.
    #[serde(with = "serde_hex::array32")]
    pub cmu: [u8; 32],
    /// Ephemeral public key.
    #[serde(with = "serde_hex::array32")]
    pub ephemeral_key: [u8; 32],
    /// First 52 bytes of the encrypted note.
    #[serde(with = "serde_hex::bytes")]
    pub ciphertext: Vec<u8>,
}

/// Orchard action summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactOrchardAction {
    /// Nullifier.
    #[serde(with = "serde_hex::array32")]
    pub nullifier: [u8; 32],
    /// Note commitment.
    #[serde(with = "serde_hex::array32")]
    pub cmx: [u8; 32],
    /// Ephemeral public key.
    #[serde(with = "serde_hex::array32")]
    pub ephemeral_key: [u8; 32],
    /// First 52 bytes of the encrypted note.
    #[serde(with = "serde_hex::bytes")]
    pub ciphertext: Vec<u8>,
}

/// Transparent input summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactTxIn {
    /// Funding transaction.
    pub prevout_txid: TxId,
    /// Output index within the funding transaction.
    pub prevout_index: u32,
}

/// Transparent output summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Value in zatoshi.
    pub value: u64,
    /// Locking script.
    #[serde(with = "serde_hex::bytes")]
    pub script_pub_key: Vec<u8>,
}

// =============================================================================
// Transactions and relay
// =============================================================================

/// Serialized transaction plus the height it was mined at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Serialized transaction.
    #[serde(with = "serde_hex::bytes")]
    pub data: Vec<u8>,
    /// Mined height, 0 when unconfirmed.
    #[serde(default)]
    pub height: BlockHeight,
}

impl RawTransaction {
    /// Transaction not yet mined.
    pub fn unmined(data: Vec<u8>) -> Self {
        Self { data, height: 0 }
    }
}

/// Result of relaying a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    /// 0 on acceptance, otherwise the node's rejection code.
    pub error_code: i32,
    /// Accepted txid or the rejection reason.
    pub error_message: String,
}

impl SendResponse {
    /// Node accepted the transaction.
    pub fn accepted(txid: TxId) -> Self {
        Self {
            error_code: 0,
            error_message: txid.to_display_hex(),
        }
    }

    /// Node (or the adapter) rejected the transaction.
    pub fn rejected(code: i32, message: impl Into<String>) -> Self {
        Self {
            error_code: code,
            error_message: message.into(),
        }
    }

    /// True when `error_code` is 0.
    pub fn is_accepted(&self) -> bool {
        self.error_code == 0
    }
}

/// Outcome of `sendrawtransaction` at the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted into the mempool.
    Accepted(TxId),
    /// Rejected with the node's code and message.
    Rejected {
        /// Node error code.
        code: i32,
        /// Node error message.
        message: String,
    },
}

// =============================================================================
// Tree state and transparent addresses
// =============================================================================

/// Note commitment tree frontiers as of one block.
///
/// Wallets restore from a birthday height with this instead of scanning
/// from activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeState {
    /// Chain name.
    pub network: String,
    /// Block height.
    pub height: BlockHeight,
    /// Block hash.
    pub hash: BlockHash,
    /// Header timestamp.
    pub time: u32,
    /// Serialized Sapling frontier as hex; empty before activation.
    pub sapling_tree: String,
    /// Serialized Orchard frontier as hex; empty before activation.
    pub orchard_tree: String,
}

/// Unspent transparent output paying a queried address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressUtxo {
    /// Paid address.
    pub address: String,
    /// Funding transaction.
    pub txid: TxId,
    /// Output index within the funding transaction.
    pub index: u32,
    /// Locking script.
    #[serde(with = "serde_hex::bytes")]
    pub script: Vec<u8>,
    /// Value in zatoshi.
    pub value_zat: u64,
    /// Mined height.
    pub height: BlockHeight,
}

/// Chain and software facts reported by the node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node software build string.
    pub build: String,
    /// Chain name as reported by the node.
    pub chain_name: String,
    /// Current best height.
    pub block_height: BlockHeight,
    /// Node's estimate of the network height.
    pub estimated_height: BlockHeight,
    /// Consensus branch id for the next block, as hex.
    pub consensus_branch_id: String,
}

/// Server and chain metadata for light clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightdInfo {
    /// Server version.
    pub version: String,
    /// Server vendor string.
    pub vendor: String,
    /// Transparent address support.
    pub taddr_support: bool,
    /// Chain name.
    pub chain_name: String,
    /// Sapling activation height.
    pub sapling_activation_height: BlockHeight,
    /// Consensus branch id as hex.
    pub consensus_branch_id: String,
    /// Current tip height.
    pub block_height: BlockHeight,
    /// Estimated network height.
    pub estimated_height: BlockHeight,
    /// Full node build string.
    pub node_build: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Hash32;

    fn tx_with(outputs: usize, actions: usize) -> CompactTx {
        CompactTx {
            index: 0,
            hash: Hash32::ZERO,
            fee: 0,
            spends: vec![],
            outputs: (0..outputs)
                .map(|_| CompactSaplingOutput {
                    cmu: [0; 32],
                    ephemeral_key: [0; 32],
                    ciphertext: vec![0; 52],
                })
                .collect(),
            actions: (0..actions)
                .map(|_| CompactOrchardAction {
                    nullifier: [0; 32],
                    cmx: [0; 32],
                    ephemeral_key: [0; 32],
                    ciphertext: vec![0; 52],
                })
                .collect(),
            vin: vec![],
            vout: vec![],
        }
    }

    #[test]
    fn test_output_counts_sum_over_transactions() {
        let block = CompactBlock {
            proto_version: PROTO_VERSION,
            height: 1,
            hash: Hash32([1; 32]),
            prev_hash: Hash32::ZERO,
            time: 0,
            vtx: vec![tx_with(2, 1), tx_with(1, 3)],
        };
        assert_eq!(block.output_counts(), (3, 4));
    }

    #[test]
    fn test_send_response_accepted() {
        let ok = SendResponse::accepted(Hash32([2; 32]));
        assert!(ok.is_accepted());
        let bad = SendResponse::rejected(-26, "dust");
        assert!(!bad.is_accepted());
        assert_eq!(bad.error_message, "dust");
    }

    #[test]
    fn test_raw_transaction_json_uses_hex() {
        let tx = RawTransaction {
            data: vec![0xde, 0xad],
            height: 7,
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["data"], "dead");
        let back: RawTransaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn test_empty_transaction_detection() {
        let tx = FullTransaction {
            txid: Hash32::ZERO,
            raw: vec![],
            inputs: vec![],
            outputs: vec![],
            sapling_spends: vec![],
            sapling_outputs: vec![],
            orchard_actions: vec![],
        };
        assert!(tx.is_empty());
    }
}
