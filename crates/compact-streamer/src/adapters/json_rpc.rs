//! JSON-RPC Full Node Connection
//!
//! Implements `FullNodeConnection` against a zcashd-compatible JSON-RPC
//! endpoint over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    AddressUtxo, BlockHash, BlockHeight, BlockLookup, ChainTip, FullBlock, FullTransaction,
    Hash32, NodeInfo, OrchardAction, RawTransaction, SaplingOutput, SaplingSpend, StreamerError,
    SubmitOutcome, TransparentInput, TransparentOutput, TreeState, TxId,
};
use crate::ports::outbound::FullNodeConnection;

/// `RPC_INVALID_ADDRESS_OR_KEY`: unknown block or transaction.
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// `RPC_INVALID_PARAMETER`: e.g. height out of range.
const RPC_INVALID_PARAMETER: i64 = -8;
/// `RPC_IN_WARMUP`: node still loading.
const RPC_IN_WARMUP: i64 = -28;

/// Connection settings for a full node's JSON-RPC endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonRpcNodeConfig {
    /// Endpoint URL (e.g., "http://127.0.0.1:8232").
    pub url: String,
    /// RPC user for basic auth.
    pub user: Option<String>,
    /// RPC password for basic auth.
    pub password: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for JsonRpcNodeConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8232".to_string(),
            user: None,
            password: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

/// Error object returned by the node.
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Why a node call failed, before mapping to [`StreamerError`].
#[derive(Debug)]
enum CallFailure {
    Transport(String),
    Rpc { code: i64, message: String },
    Decode(String),
}

impl CallFailure {
    fn into_streamer(self, method: &str) -> StreamerError {
        match self {
            CallFailure::Transport(msg) => {
                StreamerError::NodeUnavailable(format!("{}: {}", method, msg))
            }
            CallFailure::Rpc { code, message }
                if code == RPC_INVALID_ADDRESS_OR_KEY || code == RPC_INVALID_PARAMETER =>
            {
                StreamerError::NotFound(format!("{}: {}", method, message))
            }
            CallFailure::Rpc { code, message } if code == RPC_IN_WARMUP => {
                StreamerError::NodeUnavailable(format!("{}: {}", method, message))
            }
            CallFailure::Rpc { code, message } => StreamerError::CorruptInput(format!(
                "{} returned error {}: {}",
                method, code, message
            )),
            CallFailure::Decode(msg) => {
                StreamerError::CorruptInput(format!("{} response: {}", method, msg))
            }
        }
    }
}

/// HTTP JSON-RPC full node connection.
pub struct JsonRpcFullNode {
    http_client: reqwest::Client,
    config: JsonRpcNodeConfig,
    node_id: String,
    request_id: AtomicU64,
}

impl JsonRpcFullNode {
    /// Create a connection. Fails only if the HTTP client cannot be built.
    pub fn new(config: JsonRpcNodeConfig) -> Result<Self, StreamerError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| StreamerError::NodeUnavailable(format!("http client: {}", e)))?;
        let node_id = config.url.clone();
        Ok(Self {
            http_client,
            config,
            node_id,
            request_id: AtomicU64::new(1),
        })
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, CallFailure> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "1.0",
            id,
            method,
            params,
        };

        let mut builder = self.http_client.post(&self.config.url).json(&request);
        if let Some(user) = &self.config.user {
            builder = builder.basic_auth(user, self.config.password.as_deref());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CallFailure::Transport(e.to_string()))?;

        // zcashd answers RPC errors with HTTP 404/500 and a JSON body.
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| CallFailure::Transport(e.to_string()))?;
        let rpc: JsonRpcResponse<R> = serde_json::from_slice(&body).map_err(|e| {
            if status.is_success() {
                CallFailure::Decode(e.to_string())
            } else {
                CallFailure::Transport(format!("http status {}", status))
            }
        })?;

        if let Some(error) = rpc.error {
            return Err(CallFailure::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        rpc.result
            .ok_or_else(|| CallFailure::Decode("missing result".to_string()))
    }

    async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, StreamerError> {
        debug!("[cs] Node RPC {} via {}", method, self.node_id);
        self.call(method, params)
            .await
            .map_err(|f| f.into_streamer(method))
    }
}

#[async_trait]
impl FullNodeConnection for JsonRpcFullNode {
    async fn chain_tip(&self) -> Result<ChainTip, StreamerError> {
        let info: BlockchainInfo = self.request("getblockchaininfo", Vec::<()>::new()).await?;
        Ok(ChainTip {
            height: info.blocks,
            hash: Hash32::from_display_hex(&info.bestblockhash).map_err(corrupt)?,
        })
    }

    async fn block_hash(&self, height: BlockHeight) -> Result<BlockHash, StreamerError> {
        let hash: String = self.request("getblockhash", (height,)).await?;
        Hash32::from_display_hex(&hash).map_err(corrupt)
    }

    async fn block(&self, lookup: BlockLookup) -> Result<FullBlock, StreamerError> {
        let block: RpcBlock = self.request("getblock", (lookup_key(lookup), 2)).await?;
        block.into_full_block()
    }

    async fn raw_transaction(&self, txid: &TxId) -> Result<RawTransaction, StreamerError> {
        let tx: RpcRawTransaction = self
            .request("getrawtransaction", (txid.to_display_hex(), 1))
            .await?;
        Ok(RawTransaction {
            data: decode_hex("hex", &tx.hex)?,
            height: tx.height.filter(|h| *h > 0).unwrap_or(0) as BlockHeight,
        })
    }

    async fn send_raw_transaction(&self, data: &[u8]) -> Result<SubmitOutcome, StreamerError> {
        match self
            .call::<_, String>("sendrawtransaction", (hex::encode(data),))
            .await
        {
            Ok(txid) => Ok(SubmitOutcome::Accepted(
                Hash32::from_display_hex(&txid).map_err(corrupt)?,
            )),
            Err(CallFailure::Rpc { code, message }) => Ok(SubmitOutcome::Rejected {
                code: i32::try_from(code).unwrap_or(i32::MIN),
                message,
            }),
            Err(other) => Err(other.into_streamer("sendrawtransaction")),
        }
    }

    async fn tree_state(&self, lookup: BlockLookup) -> Result<TreeState, StreamerError> {
        let state: RpcTreeState = self
            .request("z_gettreestate", (lookup_key(lookup),))
            .await?;
        state.into_tree_state()
    }

    async fn address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, StreamerError> {
        let query = AddressQuery {
            addresses,
            start: None,
            end: None,
        };
        let utxos: Vec<RpcAddressUtxo> = self.request("getaddressutxos", (query,)).await?;
        utxos
            .into_iter()
            .map(|u| {
                Ok(AddressUtxo {
                    txid: Hash32::from_display_hex(&u.txid).map_err(corrupt)?,
                    script: decode_hex("script", &u.script)?,
                    address: u.address,
                    index: u.output_index,
                    value_zat: u.satoshis,
                    height: u.height,
                })
            })
            .collect()
    }

    async fn address_txids(
        &self,
        address: &str,
        start: BlockHeight,
        end: BlockHeight,
    ) -> Result<Vec<TxId>, StreamerError> {
        let addresses = [address.to_string()];
        let query = AddressQuery {
            addresses: &addresses,
            start: Some(start),
            end: Some(end),
        };
        let txids: Vec<String> = self.request("getaddresstxids", (query,)).await?;
        txids
            .iter()
            .map(|txid| Hash32::from_display_hex(txid).map_err(corrupt))
            .collect()
    }

    async fn node_info(&self) -> Result<NodeInfo, StreamerError> {
        let chain: BlockchainInfo = self.request("getblockchaininfo", Vec::<()>::new()).await?;
        let info: RpcInfo = self.request("getinfo", Vec::<()>::new()).await?;
        Ok(NodeInfo {
            build: info.build,
            chain_name: chain.chain,
            block_height: chain.blocks,
            estimated_height: chain.estimatedheight.unwrap_or(chain.blocks),
            consensus_branch_id: chain.consensus.map(|c| c.nextblock).unwrap_or_default(),
        })
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }
}

// =============================================================================
// Node request and response shapes
// =============================================================================

#[derive(Debug, Serialize)]
struct AddressQuery<'a> {
    addresses: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<BlockHeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<BlockHeight>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcAddressUtxo {
    address: String,
    txid: String,
    output_index: u32,
    script: String,
    satoshis: u64,
    height: u64,
}

#[derive(Debug, Deserialize)]
struct RpcTreeState {
    hash: String,
    height: u64,
    time: u32,
    sapling: Option<RpcPoolState>,
    orchard: Option<RpcPoolState>,
}

#[derive(Debug, Deserialize)]
struct RpcPoolState {
    commitments: Option<RpcCommitments>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcCommitments {
    #[serde(default)]
    final_state: String,
}

impl RpcPoolState {
    fn final_state(pool: Option<RpcPoolState>) -> String {
        pool.and_then(|p| p.commitments)
            .map(|c| c.final_state)
            .unwrap_or_default()
    }
}

impl RpcTreeState {
    fn into_tree_state(self) -> Result<TreeState, StreamerError> {
        Ok(TreeState {
            network: String::new(),
            height: self.height,
            hash: Hash32::from_display_hex(&self.hash).map_err(corrupt)?,
            time: self.time,
            sapling_tree: RpcPoolState::final_state(self.sapling),
            orchard_tree: RpcPoolState::final_state(self.orchard),
        })
    }
}

#[derive(Debug, Deserialize)]
struct BlockchainInfo {
    chain: String,
    blocks: u64,
    bestblockhash: String,
    estimatedheight: Option<u64>,
    consensus: Option<ConsensusInfo>,
}

#[derive(Debug, Deserialize)]
struct ConsensusInfo {
    nextblock: String,
}

#[derive(Debug, Deserialize)]
struct RpcInfo {
    #[serde(default)]
    build: String,
}

#[derive(Debug, Deserialize)]
struct RpcRawTransaction {
    hex: String,
    height: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    hash: String,
    height: u64,
    previousblockhash: Option<String>,
    time: u32,
    tx: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    txid: String,
    hex: String,
    #[serde(default)]
    vin: Vec<RpcInput>,
    #[serde(default)]
    vout: Vec<RpcOutput>,
    #[serde(default)]
    v_shielded_spend: Vec<RpcSaplingSpend>,
    #[serde(default)]
    v_shielded_output: Vec<RpcSaplingOutput>,
    orchard: Option<RpcOrchardBundle>,
}

#[derive(Debug, Deserialize)]
struct RpcInput {
    coinbase: Option<String>,
    txid: Option<String>,
    vout: Option<u32>,
    #[serde(rename = "scriptSig")]
    script_sig: Option<RpcScript>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcOutput {
    value_zat: u64,
    script_pub_key: RpcScript,
}

#[derive(Debug, Deserialize)]
struct RpcScript {
    hex: String,
}

#[derive(Debug, Deserialize)]
struct RpcSaplingSpend {
    nullifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcSaplingOutput {
    cmu: String,
    ephemeral_key: String,
    enc_ciphertext: String,
}

#[derive(Debug, Deserialize)]
struct RpcOrchardBundle {
    #[serde(default)]
    actions: Vec<RpcOrchardAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcOrchardAction {
    nullifier: String,
    cmx: String,
    ephemeral_key: String,
    enc_ciphertext: String,
}

impl RpcBlock {
    fn into_full_block(self) -> Result<FullBlock, StreamerError> {
        let hash = Hash32::from_display_hex(&self.hash).map_err(corrupt)?;
        let prev_hash = match &self.previousblockhash {
            Some(prev) => Hash32::from_display_hex(prev).map_err(corrupt)?,
            None => Hash32::ZERO,
        };
        let transactions = self
            .tx
            .into_iter()
            .map(RpcTransaction::into_full_transaction)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FullBlock {
            height: self.height,
            hash,
            prev_hash,
            time: self.time,
            transactions,
        })
    }
}

impl RpcTransaction {
    fn into_full_transaction(self) -> Result<FullTransaction, StreamerError> {
        let inputs = self
            .vin
            .into_iter()
            .map(|input| match (input.coinbase, input.txid, input.vout) {
                (Some(_), _, _) => Ok(TransparentInput::Coinbase),
                (None, Some(txid), Some(index)) => Ok(TransparentInput::Prevout {
                    txid: Hash32::from_display_hex(&txid).map_err(corrupt)?,
                    index,
                    script_sig: match input.script_sig {
                        Some(script) => decode_hex("scriptSig", &script.hex)?,
                        None => Vec::new(),
                    },
                }),
                _ => Err(StreamerError::CorruptInput(
                    "transparent input without prevout".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, StreamerError>>()?;

        let outputs = self
            .vout
            .into_iter()
            .map(|o| {
                Ok(TransparentOutput {
                    value: o.value_zat,
                    script_pub_key: decode_hex("scriptPubKey", &o.script_pub_key.hex)?,
                })
            })
            .collect::<Result<Vec<_>, StreamerError>>()?;

        // Sapling uint256 fields are printed byte-reversed; Orchard fields are raw.
        let sapling_spends = self
            .v_shielded_spend
            .into_iter()
            .map(|s| {
                Ok(SaplingSpend {
                    nullifier: decode_reversed("nullifier", &s.nullifier)?,
                })
            })
            .collect::<Result<Vec<_>, StreamerError>>()?;

        let sapling_outputs = self
            .v_shielded_output
            .into_iter()
            .map(|o| {
                Ok(SaplingOutput {
                    cmu: decode_reversed("cmu", &o.cmu)?,
                    ephemeral_key: decode_reversed("ephemeralKey", &o.ephemeral_key)?,
                    enc_ciphertext: decode_hex("encCiphertext", &o.enc_ciphertext)?,
                })
            })
            .collect::<Result<Vec<_>, StreamerError>>()?;

        let orchard_actions = self
            .orchard
            .map(|bundle| bundle.actions)
            .unwrap_or_default()
            .into_iter()
            .map(|a| {
                Ok(OrchardAction {
                    nullifier: decode_hex("nullifier", &a.nullifier)?,
                    cmx: decode_hex("cmx", &a.cmx)?,
                    ephemeral_key: decode_hex("ephemeralKey", &a.ephemeral_key)?,
                    enc_ciphertext: decode_hex("encCiphertext", &a.enc_ciphertext)?,
                })
            })
            .collect::<Result<Vec<_>, StreamerError>>()?;

        Ok(FullTransaction {
            txid: Hash32::from_display_hex(&self.txid).map_err(corrupt)?,
            raw: decode_hex("hex", &self.hex)?,
            inputs,
            outputs,
            sapling_spends,
            sapling_outputs,
            orchard_actions,
        })
    }
}

fn lookup_key(lookup: BlockLookup) -> String {
    match lookup {
        BlockLookup::Height(h) => h.to_string(),
        BlockLookup::Hash(hash) => hash.to_display_hex(),
    }
}

fn corrupt(e: StreamerError) -> StreamerError {
    StreamerError::CorruptInput(e.to_string())
}

fn decode_hex(field: &str, s: &str) -> Result<Vec<u8>, StreamerError> {
    hex::decode(s).map_err(|e| StreamerError::CorruptInput(format!("{}: {}", field, e)))
}

fn decode_reversed(field: &str, s: &str) -> Result<Vec<u8>, StreamerError> {
    let mut bytes = decode_hex(field, s)?;
    bytes.reverse();
    Ok(bytes)
}
