//! # Compact Block Cache
//!
//! Bounded LRU of compacted blocks keyed by height, with the block hash
//! checked on every read so a stale branch is never served.
//!
//! Concurrent populates of the same `(height, hash)` share one
//! `OnceCell`; the first caller runs the compaction and the others await
//! it. A failed or cancelled populate leaves the cell empty and the next
//! waiter retries.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::domain::{BlockHash, BlockHeight, CompactBlock, StreamerError};

type Slot = Arc<OnceCell<Arc<CompactBlock>>>;

/// Snapshot of cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that found nothing (or another branch).
    pub misses: u64,
    /// Blocks currently held.
    pub entries: usize,
    /// Maximum blocks held.
    pub capacity: usize,
}

/// Shared compact block cache.
pub struct CompactBlockCache {
    entries: Mutex<LruCache<BlockHeight, Arc<CompactBlock>>>,
    inflight: Mutex<HashMap<(BlockHeight, BlockHash), Slot>>,
    capacity: NonZeroUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CompactBlockCache {
    /// Create a cache holding at most `capacity` blocks (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(HashMap::new()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Block at `height`, only if it is the `hash` branch.
    pub fn get(&self, height: BlockHeight, hash: &BlockHash) -> Option<Arc<CompactBlock>> {
        let found = {
            let mut entries = self.entries.lock();
            entries
                .get(&height)
                .filter(|block| block.hash == *hash)
                .cloned()
        };
        match found {
            Some(block) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(block)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a block, replacing any other branch at the same height.
    ///
    /// A block whose own height or hash disagrees with the key is not stored.
    pub fn put(&self, height: BlockHeight, hash: BlockHash, block: Arc<CompactBlock>) {
        if block.height != height || block.hash != hash {
            tracing::warn!(
                "[cs] Refusing cache put: key {}@{} holds block {}@{}",
                hash,
                height,
                block.hash,
                block.height
            );
            return;
        }
        self.entries.lock().put(height, block);
    }

    /// Cached block, or the result of `populate` stored atomically.
    ///
    /// Callers racing on the same key run `populate` once between them.
    /// Errors are returned to the caller that produced them and nothing is
    /// stored.
    pub async fn get_or_populate<F, Fut>(
        &self,
        height: BlockHeight,
        hash: BlockHash,
        populate: F,
    ) -> Result<Arc<CompactBlock>, StreamerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CompactBlock, StreamerError>>,
    {
        if let Some(block) = self.get(height, &hash) {
            return Ok(block);
        }

        let key = (height, hash);
        let slot = self
            .inflight
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let _guard = InflightGuard {
            cache: self,
            key,
            slot: Arc::downgrade(&slot),
        };
        // Rebound after the guard so this handle drops before the guard runs.
        let slot = slot;

        let block = slot
            .get_or_try_init(|| async {
                let block = populate().await?;
                if block.height != height || block.hash != hash {
                    return Err(StreamerError::Reorganized { height });
                }
                let block = Arc::new(block);
                self.put(height, hash, Arc::clone(&block));
                Ok(block)
            })
            .await?;
        Ok(Arc::clone(block))
    }

    /// Drop every block at or above `height`. Returns how many were removed.
    pub fn invalidate_from(&self, height: BlockHeight) -> usize {
        let mut entries = self.entries.lock();
        let stale: Vec<BlockHeight> = entries
            .iter()
            .map(|(h, _)| *h)
            .filter(|h| *h >= height)
            .collect();
        for h in &stale {
            entries.pop(h);
        }
        if !stale.is_empty() {
            tracing::debug!("[cs] Invalidated {} cached blocks from height {}", stale.len(), height);
        }
        stale.len()
    }

    /// Blocks currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum blocks held.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.capacity(),
        }
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight.lock().len()
    }
}

/// Removes the in-flight slot once it is filled or no caller is left on it.
struct InflightGuard<'a> {
    cache: &'a CompactBlockCache,
    key: (BlockHeight, BlockHash),
    slot: Weak<OnceCell<Arc<CompactBlock>>>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self.cache.inflight.lock();
        let finished = match inflight.get(&self.key) {
            // Only the map's own handle left, or the value landed in the LRU.
            Some(current) if std::ptr::eq(Arc::as_ptr(current), self.slot.as_ptr()) => {
                current.initialized() || Arc::strong_count(current) <= 1
            }
            _ => false,
        };
        if finished {
            inflight.remove(&self.key);
        }
    }
}
