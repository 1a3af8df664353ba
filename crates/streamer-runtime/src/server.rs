//! # HTTP Server
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /` | JSON-RPC 2.0, single or batch; `GetBlockRange` answers as NDJSON |
//! | `GET /ws` | JSON-RPC over WebSocket, one frame per streamed block |
//! | `GET /health` | Node reachability and tip |
//! | `GET /metrics` | Prometheus text format |
//!
//! Live streams end with `Cancelled` when the server shuts down.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use compact_streamer::{
    codes, ChainSpec, CompactBlockStream, CompactStreamerService, CompactTxStreamer,
    FullNodeConnection, Method, MethodRouter, Reply, StreamerError,
};
use futures::StreamExt;
use serde_json::{json, Value};
use streamer_telemetry::metrics::{NODE_TIP_HEIGHT, TX_SUBMISSIONS};
use streamer_telemetry::{encode_metrics, record_cache, RequestTimer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::instrument::instrument_stream;
use crate::rpc::{self, RpcRequest};
use crate::ws;

const UNKNOWN_METHOD_DEADLINE: Duration = Duration::from_secs(10);

/// Shared handler state.
pub struct AppState<N: FullNodeConnection + 'static> {
    router: MethodRouter<CompactStreamerService<N>>,
    server: ServerConfig,
    metrics_enabled: bool,
    shutdown: CancellationToken,
}

impl<N: FullNodeConnection + 'static> Clone for AppState<N> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            server: self.server.clone(),
            metrics_enabled: self.metrics_enabled,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Result of executing one request.
pub enum Executed {
    /// Complete response frame.
    Frame(Value),
    /// Stream to forward, tagged with the request id.
    Stream {
        /// Request id.
        id: Value,
        /// Instrumented block stream.
        stream: CompactBlockStream,
    },
}

impl<N: FullNodeConnection + 'static> AppState<N> {
    /// Create handler state over a service.
    pub fn new(
        service: Arc<CompactStreamerService<N>>,
        server: ServerConfig,
        metrics_enabled: bool,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            router: MethodRouter::new(service),
            server,
            metrics_enabled,
            shutdown,
        }
    }

    /// Underlying service.
    pub fn service(&self) -> &Arc<CompactStreamerService<N>> {
        self.router.service()
    }

    /// Token fired on server shutdown.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Execute one request; streams stop once `cancel` fires.
    ///
    /// The call (for streams, opening the stream) is bounded by the
    /// method's deadline.
    pub async fn execute(&self, request: RpcRequest, cancel: CancellationToken) -> Executed {
        let method = request.method.parse::<Method>().ok();
        let timer = RequestTimer::start(method.map_or("unknown", |m| m.name()));

        let deadline = method.map_or(UNKNOWN_METHOD_DEADLINE, |m| m.timeout());
        let dispatched = tokio::time::timeout(
            deadline,
            self.router
                .dispatch_cancellable(&request.method, request.params, cancel),
        )
        .await
        .unwrap_or_else(|_| {
            Err(StreamerError::NodeUnavailable(format!(
                "{} exceeded {:?}",
                request.method, deadline
            )))
        });

        match dispatched {
            Ok(Reply::Unary(value)) => {
                timer.finish("ok");
                record_unary(method, &value);
                Executed::Frame(rpc::success(&request.id, value))
            }
            Ok(Reply::Stream(stream)) => Executed::Stream {
                id: request.id,
                stream: instrument_stream(stream, timer),
            },
            Err(e) => {
                timer.finish(e.kind());
                Executed::Frame(rpc::error_response(&request.id, &e))
            }
        }
    }
}

fn record_unary(method: Option<Method>, value: &Value) {
    match method {
        Some(Method::GetLatestBlock) => {
            if let Some(height) = value["height"].as_i64() {
                NODE_TIP_HEIGHT.set(height);
            }
        }
        Some(Method::SendTransaction) => {
            let result = if value["error_code"] == 0 {
                "accepted"
            } else {
                "rejected"
            };
            TX_SUBMISSIONS.with_label_values(&[result]).inc();
        }
        _ => {}
    }
}

/// Build the axum router.
pub fn build_router<N: FullNodeConnection + 'static>(state: AppState<N>) -> Router {
    let mut router = Router::new()
        .route("/", post(handle_json_rpc::<N>))
        .route("/health", get(health_check::<N>))
        .route("/metrics", get(metrics::<N>));
    if state.server.websocket_enabled {
        router = router.route("/ws", get(ws_upgrade::<N>));
    }
    router.with_state(state)
}

async fn handle_json_rpc<N: FullNodeConnection + 'static>(
    State(state): State<AppState<N>>,
    body: String,
) -> Response {
    let request: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            let message = format!("Parse error: {}", e);
            let frame = rpc::failure(&Value::Null, rpc::PARSE_ERROR, &message);
            return (StatusCode::BAD_REQUEST, Json(frame)).into_response();
        }
    };

    match request {
        Value::Array(requests) => handle_batch(&state, requests).await,
        single => handle_single(&state, single).await,
    }
}

async fn handle_single<N: FullNodeConnection + 'static>(
    state: &AppState<N>,
    value: Value,
) -> Response {
    let request = match RpcRequest::from_value(value) {
        Ok(request) => request,
        Err(frame) => return Json(frame).into_response(),
    };
    match state.execute(request, state.shutdown.child_token()).await {
        Executed::Frame(frame) => Json(frame).into_response(),
        Executed::Stream { id, stream } => ndjson_response(id, stream),
    }
}

async fn handle_batch<N: FullNodeConnection + 'static>(
    state: &AppState<N>,
    requests: Vec<Value>,
) -> Response {
    if requests.is_empty() || requests.len() > state.server.max_batch_size {
        let frame = rpc::failure(
            &Value::Null,
            rpc::INVALID_REQUEST,
            &format!(
                "Invalid Request: batch size must be 1..={}",
                state.server.max_batch_size
            ),
        );
        return Json(frame).into_response();
    }

    let mut responses = Vec::with_capacity(requests.len());
    for value in requests {
        let request = match RpcRequest::from_value(value) {
            Ok(request) => request,
            Err(frame) => {
                responses.push(frame);
                continue;
            }
        };
        if request.method == Method::GetBlockRange.name() {
            responses.push(unbatchable(&request.id));
            continue;
        }
        match state.execute(request, state.shutdown.child_token()).await {
            Executed::Frame(frame) => responses.push(frame),
            Executed::Stream { id, .. } => responses.push(unbatchable(&id)),
        }
    }
    Json(Value::Array(responses)).into_response()
}

fn unbatchable(id: &Value) -> Value {
    rpc::failure(id, rpc::INVALID_REQUEST, "GetBlockRange cannot be batched")
}

/// One JSON line per block, then a `done` line or the error.
///
/// Dropping the body (client disconnect) drops the stream, which stops
/// all node work for it.
fn ndjson_response(id: Value, stream: CompactBlockStream) -> Response {
    let lines = stream_frames(id, stream).map(|frame| {
        let mut line = frame.to_string();
        line.push('\n');
        Ok::<_, Infallible>(line)
    });
    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(lines))
        .unwrap_or_else(|e| {
            warn!("[cs] Failed to build stream response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Response frames for a block stream: one per block, then `done`.
///
/// An error frame is always the last one.
pub fn stream_frames(
    id: Value,
    stream: CompactBlockStream,
) -> impl futures::Stream<Item = Value> + Send + 'static {
    futures::stream::unfold(Some(stream), move |state| {
        let id = id.clone();
        async move {
            let mut stream = state?;
            match stream.next().await {
                Some(Ok(block)) => match serde_json::to_value(&*block) {
                    Ok(value) => Some((rpc::success(&id, value), Some(stream))),
                    Err(e) => Some((
                        rpc::failure(&id, codes::INTERNAL_ERROR, &e.to_string()),
                        None,
                    )),
                },
                Some(Err(e)) => Some((rpc::error_response(&id, &e), None)),
                None => Some((rpc::stream_done(&id), None)),
            }
        }
    })
}

async fn health_check<N: FullNodeConnection + 'static>(
    State(state): State<AppState<N>>,
) -> Response {
    match state.service().get_latest_block(ChainSpec::default()).await {
        Ok(tip) => Json(json!({
            "status": "ok",
            "node": state.service().node().connection().node_id(),
            "tip": tip,
        }))
        .into_response(),
        Err(e) => {
            warn!("[cs] Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn metrics<N: FullNodeConnection + 'static>(State(state): State<AppState<N>>) -> Response {
    if !state.metrics_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    let stats = state.service().cache_stats();
    record_cache(stats.entries, stats.hits, stats.misses);

    match encode_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            warn!("[cs] Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn ws_upgrade<N: FullNodeConnection + 'static>(
    State(state): State<AppState<N>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    debug!("[cs] WebSocket upgrade");
    upgrade
        .max_frame_size(ws::MAX_MESSAGE_SIZE)
        .max_message_size(ws::MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| ws::serve_socket(state, socket))
}
