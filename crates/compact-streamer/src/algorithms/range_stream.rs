//! # Range Stream Engine
//!
//! Turns a [`BlockRange`] into a lazy, ordered stream of compact blocks.
//!
//! ## Per height
//!
//! 1. Re-check recently emitted hashes if a revalidation is due
//! 2. Resolve the canonical hash at the height
//! 3. Serve from the cache, or fetch by hash, compact and populate
//! 4. Check the block links to the previous emission
//!
//! A broken link or a changed hash ends the stream with
//! `Reorganized { height }` naming the lowest height seen to diverge.
//! Nothing runs until the consumer polls.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::compactor::compact;
use crate::adapters::NodeAdapter;
use crate::cache::CompactBlockCache;
use crate::config::StreamerConfig;
use crate::domain::{
    BlockHash, BlockHeight, BlockId, BlockRange, CompactBlock, Direction, ResolvedRange,
    StreamerError,
};
use crate::ports::inbound::CompactBlockStream;
use crate::ports::outbound::FullNodeConnection;

/// Reorg detection cadence.
///
/// Parent links catch a reorg at or below the cursor on the next block.
/// A descending stream walks away from the tip, so a reorg replacing
/// heights it already emitted keeps every later link intact; only the
/// periodic re-check sees it, at most `revalidate_interval` emissions
/// later and only while the diverged heights are within the last
/// `revalidate_depth` emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamPolicy {
    /// Emissions between hash re-checks.
    pub revalidate_interval: u64,
    /// Recently emitted heights covered by a re-check.
    pub revalidate_depth: usize,
}

impl StreamPolicy {
    /// Policy from the streamer config.
    pub fn from_config(config: &StreamerConfig) -> Self {
        Self {
            revalidate_interval: config.revalidate_interval.max(1),
            revalidate_depth: config.revalidate_depth.max(1),
        }
    }
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self::from_config(&StreamerConfig::default())
    }
}

/// Opens range streams over a node and a shared cache.
pub struct RangeStreamEngine<N: FullNodeConnection> {
    node: Arc<NodeAdapter<N>>,
    cache: Arc<CompactBlockCache>,
    policy: StreamPolicy,
}

impl<N: FullNodeConnection + 'static> RangeStreamEngine<N> {
    /// Create an engine.
    pub fn new(
        node: Arc<NodeAdapter<N>>,
        cache: Arc<CompactBlockCache>,
        policy: StreamPolicy,
    ) -> Self {
        Self {
            node,
            cache,
            policy,
        }
    }

    /// Resolve both ends against the current tip.
    ///
    /// `None` means the range lies entirely above the tip.
    pub async fn resolve(&self, range: &BlockRange) -> Result<Option<ResolvedRange>, StreamerError> {
        let start = self.resolve_bound(&range.start, "start").await?;
        let end = self.resolve_bound(&range.end, "end").await?;
        let tip = self.node.latest_height().await?;
        Ok(clamp_to_tip(start, end, tip))
    }

    async fn resolve_bound(&self, id: &BlockId, which: &str) -> Result<BlockHeight, StreamerError> {
        match (id.height, id.hash) {
            (Some(height), None) => Ok(height),
            (Some(height), Some(hash)) => {
                match self.node.canonical_hash(height).await {
                    Ok(canonical) if canonical != hash => {
                        Err(StreamerError::Reorganized { height })
                    }
                    // Above the tip: clamped later, nothing to compare.
                    Ok(_) | Err(StreamerError::NotFound(_)) => Ok(height),
                    Err(e) => Err(e),
                }
            }
            (None, Some(hash)) => {
                let block = self
                    .node
                    .block_at(&BlockId::with_hash(hash))
                    .await
                    .map_err(|e| match e {
                        StreamerError::NotFound(_) => {
                            StreamerError::InvalidRange(format!("{} hash {} is unknown", which, hash))
                        }
                        other => other,
                    })?;
                if self.node.canonical_hash(block.height).await? != hash {
                    return Err(StreamerError::Reorganized {
                        height: block.height,
                    });
                }
                Ok(block.height)
            }
            (None, None) => Err(StreamerError::InvalidRange(format!(
                "{} has neither height nor hash",
                which
            ))),
        }
    }

    /// Open a stream over `range`.
    ///
    /// Range errors surface here; node, compaction and reorg errors
    /// arrive as the stream's final item. The stream stops at the next
    /// cycle once `cancel` fires, yielding `Cancelled`.
    pub async fn open(
        &self,
        range: &BlockRange,
        cancel: CancellationToken,
    ) -> Result<CompactBlockStream, StreamerError> {
        let Some(resolved) = self.resolve(range).await? else {
            debug!("[cs] Range starts above the tip, nothing to stream");
            return Ok(Box::pin(futures::stream::empty()));
        };

        info!(
            "[cs] Opening range stream {}..={} ({:?}, {} blocks)",
            resolved.start,
            resolved.end,
            resolved.direction,
            resolved.len()
        );

        let cursor = Cursor {
            node: Arc::clone(&self.node),
            cache: Arc::clone(&self.cache),
            policy: self.policy,
            range: resolved,
            next: Some(resolved.start),
            emitted: VecDeque::with_capacity(self.policy.revalidate_depth),
            since_check: 0,
            cancel,
            done: false,
        };

        let stream = futures::stream::unfold(cursor, |mut cursor| async move {
            let item = cursor.step().await?;
            Some((item, cursor))
        });
        Ok(Box::pin(stream))
    }
}

/// Clamp resolved heights to `tip`; `None` when nothing is left.
pub fn clamp_to_tip(
    start: BlockHeight,
    end: BlockHeight,
    tip: BlockHeight,
) -> Option<ResolvedRange> {
    let direction = Direction::between(start, end);
    let (start, end) = match direction {
        Direction::Ascending if start > tip => return None,
        Direction::Ascending => (start, end.min(tip)),
        Direction::Descending if end > tip => return None,
        Direction::Descending => (start.min(tip), end),
    };
    Some(ResolvedRange {
        start,
        end,
        direction,
    })
}

struct Emitted {
    height: BlockHeight,
    hash: BlockHash,
    prev_hash: BlockHash,
}

struct Cursor<N: FullNodeConnection> {
    node: Arc<NodeAdapter<N>>,
    cache: Arc<CompactBlockCache>,
    policy: StreamPolicy,
    range: ResolvedRange,
    next: Option<BlockHeight>,
    emitted: VecDeque<Emitted>,
    since_check: u64,
    cancel: CancellationToken,
    done: bool,
}

impl<N: FullNodeConnection> Cursor<N> {
    async fn step(&mut self) -> Option<Result<Arc<CompactBlock>, StreamerError>> {
        if self.done {
            return None;
        }
        let Some(height) = self.next else {
            debug!(
                "[cs] Range stream {}..={} complete",
                self.range.start, self.range.end
            );
            self.done = true;
            return None;
        };

        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StreamerError::Cancelled),
            produced = self.produce(height) => produced,
        };

        match result {
            Ok(block) => {
                let (sapling, orchard) = block.output_counts();
                debug!(
                    "[cs] Emitting block {} ({} sapling outputs, {} orchard actions)",
                    height, sapling, orchard
                );
                self.record(&block);
                self.next = self.range.direction.next(height, self.range.end);
                Some(Ok(block))
            }
            Err(e) => {
                self.done = true;
                match &e {
                    StreamerError::Reorganized { height: from } => {
                        warn!("[cs] Chain reorganized at {}, ending range stream", from);
                        self.cache.invalidate_from(*from);
                    }
                    StreamerError::Cancelled => {
                        debug!("[cs] Range stream cancelled before height {}", height)
                    }
                    other => warn!("[cs] Range stream failed at {}: {}", height, other),
                }
                Some(Err(e))
            }
        }
    }

    async fn produce(&mut self, height: BlockHeight) -> Result<Arc<CompactBlock>, StreamerError> {
        if self.since_check >= self.policy.revalidate_interval && !self.emitted.is_empty() {
            if let Some(diverged) = self.first_divergence().await? {
                return Err(StreamerError::Reorganized { height: diverged });
            }
            self.since_check = 0;
        }

        let hash = match self.node.canonical_hash(height).await {
            Ok(hash) => hash,
            // The chain was at least this tall when the range was resolved.
            Err(StreamerError::NotFound(_)) => return Err(self.reorg_at_or_below(height).await),
            Err(e) => return Err(e),
        };

        let node = Arc::clone(&self.node);
        let block = self
            .cache
            .get_or_populate(height, hash, || async move {
                let full = node.block_by_hash(height, hash).await?;
                compact(&full)
            })
            .await?;

        if !self.links_to_last(&block) {
            return Err(self.reorg_at_or_below(height).await);
        }
        Ok(block)
    }

    fn links_to_last(&self, block: &CompactBlock) -> bool {
        match self.emitted.back() {
            None => true,
            Some(last) => match self.range.direction {
                Direction::Ascending => block.prev_hash == last.hash,
                Direction::Descending => last.prev_hash == block.hash,
            },
        }
    }

    fn record(&mut self, block: &CompactBlock) {
        if self.emitted.len() >= self.policy.revalidate_depth {
            self.emitted.pop_front();
        }
        self.emitted.push_back(Emitted {
            height: block.height,
            hash: block.hash,
            prev_hash: block.prev_hash,
        });
        self.since_check += 1;
    }

    /// Lowest recently emitted height whose hash is no longer canonical.
    async fn first_divergence(&self) -> Result<Option<BlockHeight>, StreamerError> {
        let mut lowest: Option<BlockHeight> = None;
        for entry in &self.emitted {
            let diverged = match self.node.canonical_hash(entry.height).await {
                Ok(canonical) => canonical != entry.hash,
                Err(StreamerError::NotFound(_)) => true,
                Err(e) => return Err(e),
            };
            if diverged {
                lowest = Some(lowest.map_or(entry.height, |l| l.min(entry.height)));
            }
        }
        Ok(lowest)
    }

    async fn reorg_at_or_below(&self, height: BlockHeight) -> StreamerError {
        match self.first_divergence().await {
            Ok(Some(diverged)) => StreamerError::Reorganized {
                height: diverged.min(height),
            },
            Ok(None) => StreamerError::Reorganized { height },
            Err(e) => e,
        }
    }
}

/// Drive `source` on its own task behind a one-slot channel.
///
/// A slot is reserved before each item is produced, so at most one block
/// is prepared beyond what the consumer has taken. Once `cancel` fires the
/// consumer receives `Cancelled` as the final item. The task stops when
/// the receiver is dropped or after the first error.
pub fn spawn_range_stream(
    mut source: CompactBlockStream,
    cancel: CancellationToken,
) -> CompactBlockStream {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        loop {
            let Ok(permit) = tx.reserve().await else {
                break;
            };

            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(Err(StreamerError::Cancelled)),
                _ = tx.closed() => break,
                item = source.next() => item,
            };

            match item {
                Some(item) => {
                    let last = item.is_err();
                    permit.send(item);
                    if last {
                        break;
                    }
                }
                None => break,
            }
        }
        debug!("[cs] Range stream task finished");
    });

    Box::pin(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_ascending_within_tip() {
        let r = clamp_to_tip(100, 102, 102).unwrap();
        assert_eq!((r.start, r.end), (100, 102));
        assert_eq!(r.direction, Direction::Ascending);
    }

    #[test]
    fn test_clamp_ascending_end_above_tip() {
        let r = clamp_to_tip(100, 200, 150).unwrap();
        assert_eq!((r.start, r.end), (100, 150));
    }

    #[test]
    fn test_clamp_ascending_start_above_tip_is_empty() {
        assert!(clamp_to_tip(151, 200, 150).is_none());
    }

    #[test]
    fn test_clamp_descending_start_above_tip() {
        let r = clamp_to_tip(200, 100, 150).unwrap();
        assert_eq!((r.start, r.end), (150, 100));
        assert_eq!(r.direction, Direction::Descending);
    }

    #[test]
    fn test_clamp_descending_end_above_tip_is_empty() {
        assert!(clamp_to_tip(300, 200, 150).is_none());
    }

    #[test]
    fn test_clamp_single_height() {
        let r = clamp_to_tip(7, 7, 7).unwrap();
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_policy_floors_at_one() {
        let config = StreamerConfig {
            revalidate_interval: 0,
            revalidate_depth: 0,
            ..StreamerConfig::default()
        };
        let policy = StreamPolicy::from_config(&config);
        assert_eq!(policy.revalidate_interval, 1);
        assert_eq!(policy.revalidate_depth, 1);
    }
}
