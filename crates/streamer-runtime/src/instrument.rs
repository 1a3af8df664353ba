//! Request and stream metrics around the method router.

use std::sync::Arc;

use compact_streamer::{CompactBlock, CompactBlockStream, StreamerError};
use futures::StreamExt;
use streamer_telemetry::metrics::{BLOCKS_STREAMED, STREAMS_ACTIVE, STREAMS_TERMINATED};
use streamer_telemetry::RequestTimer;

/// Count blocks and record how and when `stream` ends.
///
/// A stream dropped before its last item counts as `disconnected`.
pub fn instrument_stream(stream: CompactBlockStream, timer: RequestTimer) -> CompactBlockStream {
    let guard = StreamGuard::open(timer);
    Box::pin(futures::stream::unfold(
        (stream, guard),
        |(mut stream, mut guard)| async move {
            match stream.next().await {
                Some(item) => {
                    guard.observe(&item);
                    Some((item, (stream, guard)))
                }
                None => {
                    guard.complete();
                    None
                }
            }
        },
    ))
}

struct StreamGuard {
    timer: Option<RequestTimer>,
    reason: Option<&'static str>,
}

impl StreamGuard {
    fn open(timer: RequestTimer) -> Self {
        STREAMS_ACTIVE.inc();
        Self {
            timer: Some(timer),
            reason: None,
        }
    }

    fn observe(&mut self, item: &Result<Arc<CompactBlock>, StreamerError>) {
        match item {
            Ok(_) => BLOCKS_STREAMED.inc(),
            Err(e) => self.reason = Some(e.kind()),
        }
    }

    fn complete(&mut self) {
        self.reason.get_or_insert("complete");
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let reason = self.reason.unwrap_or("disconnected");
        STREAMS_ACTIVE.dec();
        STREAMS_TERMINATED.with_label_values(&[reason]).inc();
        if let Some(timer) = self.timer.take() {
            timer.finish(if reason == "complete" { "ok" } else { reason });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compact_streamer::{
        BlockRange, CompactStreamerService, CompactTxStreamer, MockFullNode, StreamerConfig,
    };

    async fn open(tip: u64, start: u64, end: u64) -> (MockFullNode, CompactBlockStream) {
        let node = MockFullNode::with_chain(tip);
        let service = CompactStreamerService::new(node.clone(), StreamerConfig::for_testing());
        let stream = service
            .get_block_range(BlockRange::heights(start, end))
            .await
            .unwrap();
        (node, instrument_stream(stream, RequestTimer::start("GetBlockRange")))
    }

    #[tokio::test]
    async fn test_completed_stream_counts_blocks() {
        let before_blocks = BLOCKS_STREAMED.get();
        let before_done = STREAMS_TERMINATED.with_label_values(&["complete"]).get();
        let (_node, stream) = open(10, 2, 5).await;
        assert_eq!(stream.count().await, 4);
        assert!(BLOCKS_STREAMED.get() >= before_blocks + 4);
        assert!(STREAMS_TERMINATED.with_label_values(&["complete"]).get() > before_done);
    }

    #[tokio::test]
    async fn test_dropped_stream_counts_as_disconnected() {
        let before = STREAMS_TERMINATED.with_label_values(&["disconnected"]).get();
        let (_node, mut stream) = open(10, 0, 10).await;
        stream.next().await.unwrap().unwrap();
        drop(stream);
        assert!(STREAMS_TERMINATED.with_label_values(&["disconnected"]).get() > before);
    }

    #[tokio::test]
    async fn test_failed_stream_counts_error_kind() {
        let before = STREAMS_TERMINATED.with_label_values(&["node_unavailable"]).get();
        let (node, mut stream) = open(10, 0, 10).await;
        stream.next().await.unwrap().unwrap();
        node.set_unavailable(true);
        while stream.next().await.is_some() {}
        assert!(STREAMS_TERMINATED.with_label_values(&["node_unavailable"]).get() > before);
    }
}
