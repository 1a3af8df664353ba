//! # WebSocket API Tests
//!
//! Drives the `/ws` endpoint of a bound runtime with a real client.
//!
//! ## Test Categories
//!
//! 1. **Calls** - unary frames, range frames, parse errors
//! 2. **Flow control** - busy connection, close cancels the stream
//! 3. **Limits** - oversized requests

use std::net::SocketAddr;
use std::time::Duration;

use compact_streamer::{codes, MockFullNode, StreamerConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use streamer_runtime::{rpc, ws, RuntimeConfig, StreamerRuntime};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// TEST HELPERS
// =============================================================================

struct TestServer {
    addr: SocketAddr,
    node: MockFullNode,
    shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl TestServer {
    async fn start(tip: u64) -> Self {
        streamer_telemetry::register_metrics().unwrap();
        let mut config = RuntimeConfig {
            streamer: StreamerConfig::for_testing(),
            ..Default::default()
        };
        config.server.listen_addr = "127.0.0.1:0".parse().unwrap();

        let node = MockFullNode::with_chain(tip);
        let runtime = StreamerRuntime::bind_with_node(&config, node.clone())
            .await
            .unwrap();
        let addr = runtime.local_addr().unwrap();
        let shutdown = runtime.shutdown_token();
        tokio::spawn(runtime.run());
        Self {
            addr,
            node,
            shutdown,
        }
    }

    async fn connect(&self) -> Client {
        let (client, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .unwrap();
        client
    }
}

fn request(id: u64, method: &str, params: Value) -> Message {
    Message::text(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string())
}

async fn next_frame(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), client.next())
            .await
            .expect("no frame within 10s")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(_) = message {
            return serde_json::from_str(message.to_text().unwrap()).unwrap();
        }
    }
}

async fn frames_until_done(client: &mut Client, id: u64) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(client).await;
        let finished = frame["id"] == id && (frame["done"] == true || !frame["error"].is_null());
        frames.push(frame);
        if finished {
            return frames;
        }
    }
}

// =============================================================================
// CALLS
// =============================================================================

#[tokio::test]
async fn test_unary_call_gets_one_frame() {
    let server = TestServer::start(9).await;
    let mut client = server.connect().await;
    client
        .send(request(1, "GetLatestBlock", json!({})))
        .await
        .unwrap();
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["id"], 1);
    assert_eq!(frame["result"]["height"], 9);
}

#[tokio::test]
async fn test_block_range_frame_per_block_then_done() {
    let server = TestServer::start(20).await;
    let mut client = server.connect().await;
    client
        .send(request(
            7,
            "GetBlockRange",
            json!({"start": {"height": 3}, "end": {"height": 6}}),
        ))
        .await
        .unwrap();

    let frames = frames_until_done(&mut client, 7).await;
    assert_eq!(frames.len(), 5);
    let heights: Vec<u64> = frames[..4]
        .iter()
        .map(|f| f["result"]["height"].as_u64().unwrap())
        .collect();
    assert_eq!(heights, vec![3, 4, 5, 6]);
    assert_eq!(frames[4]["done"], true);
}

#[tokio::test]
async fn test_reorg_mid_stream_is_last_frame() {
    let server = TestServer::start(30).await;
    let mut client = server.connect().await;
    client
        .send(request(
            2,
            "GetBlockRange",
            json!({"start": {"height": 10}, "end": {"height": 30}}),
        ))
        .await
        .unwrap();
    assert_eq!(next_frame(&mut client).await["result"]["height"], 10);
    server.node.reorg_from(5);

    let frames = frames_until_done(&mut client, 2).await;
    let last = frames.last().unwrap();
    assert_eq!(last["error"]["code"], codes::REORGANIZED);
    // Only heights the stream emitted can be named.
    assert_eq!(last["error"]["data"]["height"], 10);
}

#[tokio::test]
async fn test_garbage_frame_is_parse_error() {
    let server = TestServer::start(3).await;
    let mut client = server.connect().await;
    client.send(Message::text("{nope")).await.unwrap();
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["error"]["code"], rpc::PARSE_ERROR);

    // The connection stays usable.
    client
        .send(request(2, "GetLatestBlock", json!({})))
        .await
        .unwrap();
    assert_eq!(next_frame(&mut client).await["result"]["height"], 3);
}

// =============================================================================
// FLOW CONTROL
// =============================================================================

#[tokio::test]
async fn test_request_mid_stream_is_busy() {
    let server = TestServer::start(20).await;
    server.node.set_latency(Duration::from_millis(5));
    let mut client = server.connect().await;
    client
        .send(request(
            7,
            "GetBlockRange",
            json!({"start": {"height": 0}, "end": {"height": 20}}),
        ))
        .await
        .unwrap();
    assert_eq!(next_frame(&mut client).await["result"]["height"], 0);

    client
        .send(request(99, "GetLatestBlock", json!({})))
        .await
        .unwrap();
    let frames = frames_until_done(&mut client, 7).await;
    let busy: Vec<&Value> = frames.iter().filter(|f| f["id"] == 99).collect();
    assert_eq!(busy.len(), 1);
    assert_eq!(busy[0]["error"]["code"], ws::CONNECTION_BUSY);
    assert_eq!(frames.last().unwrap()["done"], true);
    let blocks = frames.iter().filter(|f| f["id"] == 7 && !f["result"].is_null()).count();
    assert_eq!(blocks, 20);

    // Once the stream is done the connection takes calls again.
    client
        .send(request(100, "GetLatestBlock", json!({})))
        .await
        .unwrap();
    assert_eq!(next_frame(&mut client).await["result"]["height"], 20);
}

#[tokio::test]
async fn test_close_stops_node_fetches() {
    let server = TestServer::start(500).await;
    server.node.set_latency(Duration::from_millis(5));
    let mut client = server.connect().await;
    client
        .send(request(
            1,
            "GetBlockRange",
            json!({"start": {"height": 0}, "end": {"height": 500}}),
        ))
        .await
        .unwrap();
    next_frame(&mut client).await;
    next_frame(&mut client).await;
    client.close(None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let settled = server.node.block_fetches();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.node.block_fetches(), settled);
    assert!(settled < 50, "{} fetches after close", settled);
}

// =============================================================================
// LIMITS
// =============================================================================

#[tokio::test]
async fn test_oversized_request_closes_connection() {
    let server = TestServer::start(3).await;
    let mut client = server.connect().await;
    let padding = "x".repeat(ws::MAX_MESSAGE_SIZE);
    // Would be a valid call if it were accepted: unknown fields are ignored.
    client
        .send(request(1, "GetLatestBlock", json!({"padding": padding})))
        .await
        .unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap();
    match next {
        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {}
        Some(Ok(other)) => panic!("oversized request was answered: {:?}", other),
    }
}

#[tokio::test]
async fn test_request_under_limit_is_served() {
    let server = TestServer::start(3).await;
    let mut client = server.connect().await;
    let padding = "x".repeat(ws::MAX_MESSAGE_SIZE / 2);
    client
        .send(request(1, "GetLatestBlock", json!({"padding": padding})))
        .await
        .unwrap();
    assert_eq!(next_frame(&mut client).await["result"]["height"], 3);
}
