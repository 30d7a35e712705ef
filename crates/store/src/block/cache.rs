//! Shared read cache for committed blocks.
//!
//! Uses clock eviction (approximate LRU) for low overhead. Only durable
//! content is cached; writers keep their uncommitted blocks privately.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use super::Block;
use crate::error::BlockId;

/// Block cache with clock eviction.
///
/// Tracks hit/miss counters for observability.
pub struct BlockCache {
    inner: Mutex<CacheInner>,
    /// Maximum number of blocks to cache.
    capacity: usize,
    /// Total cache hits since creation.
    hits: AtomicU64,
    /// Total cache misses since creation.
    misses: AtomicU64,
}

struct CacheInner {
    entries: HashMap<BlockId, CacheEntry>,
    /// Clock ring of cached IDs.
    order: Vec<BlockId>,
    /// Clock hand for eviction.
    hand: usize,
}

/// Cache entry with access tracking.
struct CacheEntry {
    block: Block,
    /// Second-chance bit.
    accessed: bool,
}

impl BlockCache {
    /// Creates a new cache with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(capacity),
                order: Vec::with_capacity(capacity),
                hand: 0,
            }),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns a clone of the cached block, or `None` if not present.
    pub fn get(&self, block_id: BlockId) -> Option<Block> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&block_id) {
            entry.accessed = true;
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.block.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Inserts or replaces a block, evicting one entry if the cache is full.
    pub fn insert(&self, block: Block) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&block.id) {
            entry.block = block;
            entry.accessed = true;
            return;
        }

        if inner.entries.len() >= self.capacity {
            inner.evict_one();
        }

        inner.order.push(block.id);
        inner.entries.insert(block.id, CacheEntry { block, accessed: true });
    }

    /// Drops a block from the cache.
    pub fn remove(&self, block_id: BlockId) {
        let mut inner = self.inner.lock();
        if inner.entries.remove(&block_id).is_some() {
            inner.order.retain(|&id| id != block_id);
            if inner.hand >= inner.order.len() {
                inner.hand = 0;
            }
        }
    }

    /// Clears all cached blocks.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.hand = 0;
    }

    /// Returns the number of cached blocks.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Checks if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Checks if a block is in the cache.
    pub fn contains(&self, block_id: BlockId) -> bool {
        self.inner.lock().entries.contains_key(&block_id)
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl CacheInner {
    /// Evicts one block using the clock algorithm.
    fn evict_one(&mut self) {
        // Every entry is visited at most twice: once to clear its bit, once to evict.
        for _ in 0..self.order.len() * 2 {
            if self.hand >= self.order.len() {
                self.hand = 0;
            }
            let block_id = self.order[self.hand];
            match self.entries.get_mut(&block_id) {
                Some(entry) if entry.accessed => {
                    entry.accessed = false;
                    self.hand += 1;
                },
                _ => {
                    self.entries.remove(&block_id);
                    self.order.remove(self.hand);
                    return;
                },
            }
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of cached blocks.
    pub size: usize,
    /// Maximum capacity.
    pub capacity: usize,
    /// Total cache hits since creation.
    pub hits: u64,
    /// Total cache misses since creation.
    pub misses: u64,
}
