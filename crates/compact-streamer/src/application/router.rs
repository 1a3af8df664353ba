//! # Method Router
//!
//! Maps RPC method names onto typed [`CompactTxStreamer`] calls.
//! Parameters arrive as JSON; unary results leave as JSON and range
//! streams are handed back untouched for the transport to drive.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    BlockId, BlockRange, ChainSpec, GetAddressUtxosArg, RawTransaction, StreamerError,
    TransparentAddressBlockFilter, TxFilter,
};
use crate::ports::{CompactBlockStream, CompactTxStreamer};

/// Correlation ID for tracking a call through the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new, time-ordered correlation ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Served RPC methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Current chain tip.
    GetLatestBlock,
    /// One compact block.
    GetBlock,
    /// Stream of compact blocks.
    GetBlockRange,
    /// Raw transaction lookup.
    GetTransaction,
    /// Transaction relay.
    SendTransaction,
    /// Server and chain metadata.
    GetLightdInfo,
    /// Commitment tree state at a block.
    GetTreeState,
    /// Unspent outputs of transparent addresses.
    GetAddressUtxos,
    /// Transactions touching a transparent address.
    GetTaddressTxids,
}

impl Method {
    /// Every served method.
    pub const ALL: [Method; 9] = [
        Method::GetLatestBlock,
        Method::GetBlock,
        Method::GetBlockRange,
        Method::GetTransaction,
        Method::SendTransaction,
        Method::GetLightdInfo,
        Method::GetTreeState,
        Method::GetAddressUtxos,
        Method::GetTaddressTxids,
    ];

    /// Wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Method::GetLatestBlock => "GetLatestBlock",
            Method::GetBlock => "GetBlock",
            Method::GetBlockRange => "GetBlockRange",
            Method::GetTransaction => "GetTransaction",
            Method::SendTransaction => "SendTransaction",
            Method::GetLightdInfo => "GetLightdInfo",
            Method::GetTreeState => "GetTreeState",
            Method::GetAddressUtxos => "GetAddressUtxos",
            Method::GetTaddressTxids => "GetTaddressTxids",
        }
    }

    /// True for server-streaming methods.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Method::GetBlockRange)
    }

    /// Recommended transport deadline.
    pub fn timeout(&self) -> Duration {
        if self.is_streaming() {
            Duration::from_secs(90)
        } else {
            Duration::from_secs(10)
        }
    }
}

impl FromStr for Method {
    type Err = StreamerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| StreamerError::MethodNotFound(s.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Routed call result.
pub enum Reply {
    /// Single JSON response.
    Unary(Value),
    /// Compact block stream for the transport to drive.
    Stream(CompactBlockStream),
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Unary(value) => f.debug_tuple("Unary").field(value).finish(),
            Reply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Dispatches method calls to a [`CompactTxStreamer`].
pub struct MethodRouter<S: CompactTxStreamer> {
    service: Arc<S>,
}

impl<S: CompactTxStreamer> Clone for MethodRouter<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

impl<S: CompactTxStreamer> MethodRouter<S> {
    /// Create a router over a service.
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    /// Wrapped service.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Route a call by method name. `null` params are treated as `{}`.
    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Reply, StreamerError> {
        self.dispatch_cancellable(method, params, CancellationToken::new()).await
    }

    /// Route a call; a returned stream ends with `Cancelled` once `cancel` fires.
    pub async fn dispatch_cancellable(
        &self,
        method: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Reply, StreamerError> {
        let correlation_id = CorrelationId::new();
        let method = match method.parse::<Method>() {
            Ok(method) => method,
            Err(e) => {
                warn!(%correlation_id, "[cs] Unknown method {}", method);
                return Err(e);
            }
        };

        let started = Instant::now();
        let result = self.route(method, params, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(%correlation_id, %method, elapsed_ms, "[cs] Handled call"),
            Err(e) => warn!(
                %correlation_id,
                %method,
                elapsed_ms,
                kind = e.kind(),
                "[cs] Call failed: {}",
                e
            ),
        }
        result
    }

    async fn route(
        &self,
        method: Method,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Reply, StreamerError> {
        match method {
            Method::GetLatestBlock => {
                let chain: ChainSpec = parse_params(params)?;
                unary(&self.service.get_latest_block(chain).await?)
            }
            Method::GetBlock => {
                let id: BlockId = parse_params(params)?;
                unary(&*self.service.get_block(id).await?)
            }
            Method::GetBlockRange => {
                // A range that does not decode is still a bad range.
                let range: BlockRange = parse_params(params).map_err(|e| match e {
                    StreamerError::InvalidArgument(msg) => StreamerError::InvalidRange(msg),
                    other => other,
                })?;
                Ok(Reply::Stream(
                    self.service.open_block_range(range, cancel).await?,
                ))
            }
            Method::GetTransaction => {
                let filter: TxFilter = parse_params(params)?;
                unary(&self.service.get_transaction(filter).await?)
            }
            Method::SendTransaction => {
                let tx: RawTransaction = parse_params(params)?;
                unary(&self.service.send_transaction(tx).await?)
            }
            Method::GetLightdInfo => unary(&self.service.get_lightd_info().await?),
            Method::GetTreeState => {
                let id: BlockId = parse_params(params)?;
                unary(&self.service.get_tree_state(id).await?)
            }
            Method::GetAddressUtxos => {
                let arg: GetAddressUtxosArg = parse_params(params)?;
                unary(&self.service.get_address_utxos(arg).await?)
            }
            Method::GetTaddressTxids => {
                let filter: TransparentAddressBlockFilter = parse_params(params)?;
                unary(&self.service.get_taddress_txids(filter).await?)
            }
        }
    }
}

/// Decode JSON params into a request type.
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, StreamerError> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| StreamerError::InvalidArgument(format!("invalid params: {}", e)))
}

fn unary<T: Serialize>(value: &T) -> Result<Reply, StreamerError> {
    serde_json::to_value(value)
        .map(Reply::Unary)
        .map_err(|e| StreamerError::CorruptInput(format!("encode response: {}", e)))
}
