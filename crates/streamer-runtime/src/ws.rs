//! WebSocket transport.
//!
//! Each text frame is one JSON-RPC request. Unary calls get one response
//! frame; `GetBlockRange` gets a frame per block followed by a `done`
//! frame or the error. One call runs at a time per connection; requests
//! arriving mid-stream are refused. Closing the socket cancels the stream.
//! A request above [`MAX_MESSAGE_SIZE`] closes the connection.

use axum::extract::ws::{Message, WebSocket};
use compact_streamer::{
    spawn_range_stream, CompactBlockStream, CorrelationId, FullNodeConnection,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tracing::{debug, info};

use crate::rpc::{self, RpcRequest};
use crate::server::{stream_frames, AppState, Executed};

/// `-32005`: a stream is already running on this connection.
pub const CONNECTION_BUSY: i32 = -32005;

/// Maximum accepted request message. Larger ones fail the read and
/// close the connection.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

enum Flow {
    Continue,
    Closed,
}

/// Serve one upgraded connection until it closes or the server stops.
pub async fn serve_socket<N: FullNodeConnection + 'static>(state: AppState<N>, socket: WebSocket) {
    let connection_id = CorrelationId::new();
    let shutdown = state.shutdown_token().child_token();
    let (mut sender, mut receiver) = socket.split();
    info!(%connection_id, "[cs] WebSocket connected");

    loop {
        let incoming = tokio::select! {
            _ = shutdown.cancelled() => break,
            incoming = receiver.next() => incoming,
        };
        let text = match incoming {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    let frame =
                        rpc::failure(&Value::Null, rpc::PARSE_ERROR, "binary frame is not UTF-8");
                    if !send(&mut sender, &frame).await {
                        break;
                    }
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                info!(%connection_id, "[cs] WebSocket read failed: {}", e);
                break;
            }
        };

        let request = match parse_request(&text) {
            Ok(request) => request,
            Err(frame) => {
                if !send(&mut sender, &frame).await {
                    break;
                }
                continue;
            }
        };

        let call_cancel = shutdown.child_token();
        let flow = match state.execute(request, call_cancel.clone()).await {
            Executed::Frame(frame) => {
                if send(&mut sender, &frame).await {
                    Flow::Continue
                } else {
                    Flow::Closed
                }
            }
            Executed::Stream { id, stream } => {
                let stream = spawn_range_stream(stream, call_cancel.clone());
                let flow = forward(&mut sender, &mut receiver, id, stream).await;
                call_cancel.cancel();
                flow
            }
        };
        if let Flow::Closed = flow {
            break;
        }
    }

    info!(%connection_id, "[cs] WebSocket closed");
}

fn parse_request(text: &str) -> Result<RpcRequest, Value> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        rpc::failure(&Value::Null, rpc::PARSE_ERROR, &format!("Parse error: {}", e))
    })?;
    RpcRequest::from_value(value)
}

async fn forward(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    id: Value,
    stream: CompactBlockStream,
) -> Flow {
    let mut frames = Box::pin(stream_frames(id, stream));
    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(frame) => {
                    if !send(sender, &frame).await {
                        return Flow::Closed;
                    }
                }
                None => return Flow::Continue,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let id = parse_request(&text).map(|r| r.id).unwrap_or(Value::Null);
                    let frame = rpc::failure(&id, CONNECTION_BUSY, "a stream is already running");
                    if !send(sender, &frame).await {
                        return Flow::Closed;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Flow::Closed,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// False once the peer is gone.
async fn send(sender: &mut SplitSink<WebSocket, Message>, frame: &Value) -> bool {
    match sender.send(Message::Text(frame.to_string())).await {
        Ok(()) => true,
        Err(e) => {
            debug!("[cs] WebSocket send failed: {}", e);
            false
        }
    }
}
