//! # Block Compactor
//!
//! Reduces a full block to the fields a light client needs for trial
//! decryption and nullifier tracking.
//!
//! ## Dropped
//!
//! Input scripts, proofs, signatures, binding data and every ciphertext
//! byte past [`COMPACT_NOTE_SIZE`].

use std::collections::HashSet;

use crate::domain::{
    CompactBlock, CompactOrchardAction, CompactSaplingOutput, CompactSaplingSpend, CompactTx,
    CompactTxIn, FullBlock, FullTransaction, OrchardAction, SaplingOutput, StreamerError,
    TransparentInput, TxOut, PROTO_VERSION,
};

/// Leading ciphertext bytes kept per note (version, diversifier, value, rseed).
pub const COMPACT_NOTE_SIZE: usize = 52;

/// Compact a full block.
///
/// Pure and deterministic. Transactions with nothing to summarise are
/// omitted; the rest keep their original block position in `index`.
///
/// # Errors
///
/// `CorruptInput` when a field has the wrong length, a ciphertext is
/// shorter than [`COMPACT_NOTE_SIZE`], a txid repeats, or the block links
/// to itself.
pub fn compact(block: &FullBlock) -> Result<CompactBlock, StreamerError> {
    if block.hash == block.prev_hash {
        return Err(corrupt(block.height, "block hash equals parent hash"));
    }

    let mut seen = HashSet::with_capacity(block.transactions.len());
    let mut vtx = Vec::new();

    for (position, tx) in block.transactions.iter().enumerate() {
        if !seen.insert(tx.txid) {
            return Err(corrupt(
                block.height,
                &format!("duplicate txid {} at index {}", tx.txid, position),
            ));
        }
        if tx.is_empty() {
            continue;
        }
        vtx.push(compact_tx(block.height, position as u64, tx)?);
    }

    Ok(CompactBlock {
        proto_version: PROTO_VERSION,
        height: block.height,
        hash: block.hash,
        prev_hash: block.prev_hash,
        time: block.time,
        vtx,
    })
}

fn compact_tx(height: u64, index: u64, tx: &FullTransaction) -> Result<CompactTx, StreamerError> {
    let spends = tx
        .sapling_spends
        .iter()
        .map(|s| {
            Ok(CompactSaplingSpend {
                nf: field32(height, "sapling nullifier", &s.nullifier)?,
            })
        })
        .collect::<Result<Vec<_>, StreamerError>>()?;

    let outputs = tx
        .sapling_outputs
        .iter()
        .map(|o| compact_sapling_output(height, o))
        .collect::<Result<Vec<_>, _>>()?;

    let actions = tx
        .orchard_actions
        .iter()
        .map(|a| compact_orchard_action(height, a))
        .collect::<Result<Vec<_>, _>>()?;

    let vin = tx
        .inputs
        .iter()
        .filter_map(|input| match input {
            TransparentInput::Coinbase => None,
            TransparentInput::Prevout { txid, index, .. } => Some(CompactTxIn {
                prevout_txid: *txid,
                prevout_index: *index,
            }),
        })
        .collect();

    let vout = tx
        .outputs
        .iter()
        .map(|o| TxOut {
            value: o.value,
            script_pub_key: o.script_pub_key.clone(),
        })
        .collect();

    Ok(CompactTx {
        index,
        hash: tx.txid,
        fee: 0,
        spends,
        outputs,
        actions,
        vin,
        vout,
    })
}

fn compact_sapling_output(
    height: u64,
    output: &SaplingOutput,
) -> Result<CompactSaplingOutput, StreamerError> {
    Ok(CompactSaplingOutput {
        cmu: field32(height, "sapling cmu", &output.cmu)?,
        ephemeral_key: field32(height, "sapling ephemeral key", &output.ephemeral_key)?,
        ciphertext: note_prefix(height, "sapling ciphertext", &output.enc_ciphertext)?,
    })
}

fn compact_orchard_action(
    height: u64,
    action: &OrchardAction,
) -> Result<CompactOrchardAction, StreamerError> {
    Ok(CompactOrchardAction {
        nullifier: field32(height, "orchard nullifier", &action.nullifier)?,
        cmx: field32(height, "orchard cmx", &action.cmx)?,
        ephemeral_key: field32(height, "orchard ephemeral key", &action.ephemeral_key)?,
        ciphertext: note_prefix(height, "orchard ciphertext", &action.enc_ciphertext)?,
    })
}

fn field32(height: u64, name: &str, bytes: &[u8]) -> Result<[u8; 32], StreamerError> {
    <[u8; 32]>::try_from(bytes).map_err(|_| {
        corrupt(
            height,
            &format!("{} must be 32 bytes, got {}", name, bytes.len()),
        )
    })
}

fn note_prefix(height: u64, name: &str, bytes: &[u8]) -> Result<Vec<u8>, StreamerError> {
    bytes
        .get(..COMPACT_NOTE_SIZE)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            corrupt(
                height,
                &format!(
                    "{} shorter than {} bytes ({})",
                    name,
                    COMPACT_NOTE_SIZE,
                    bytes.len()
                ),
            )
        })
}

fn corrupt(height: u64, detail: &str) -> StreamerError {
    StreamerError::CorruptInput(format!("block {}: {}", height, detail))
}
