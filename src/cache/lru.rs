//! LRU (Least Recently Used) cache implementation for data blocks.
//!
//! This module provides a thread-safe LRU cache holding decoded SST
//! data blocks, shared across all open SSTs.

use crate::sstable::Block;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A unique identifier for a cached block.
///
/// Combines the SST id and the block's index within that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Id of the SST file the block belongs to.
    pub sst_id: u64,
    /// Index of the block within the file.
    pub block_idx: usize,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(sst_id: u64, block_idx: usize) -> Self {
        Self { sst_id, block_idx }
    }
}

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Total number of cache lookups
    pub lookups: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

struct LruState {
    /// Cache entries stored by key
    entries: HashMap<CacheKey, Arc<Block>>,
    /// LRU queue (most recently used at the back)
    queue: VecDeque<CacheKey>,
}

/// Thread-safe LRU cache for SST blocks.
///
/// Capacity is counted in blocks. Eviction is free to drop any entry;
/// readers must tolerate a miss after a prior put.
///
/// # Thread Safety
///
/// The cache is safe to share across threads via `Arc<BlockCache>`.
pub struct BlockCache {
    /// Maximum number of cached blocks
    capacity: usize,
    state: RwLock<LruState>,
    stats: RwLock<CacheStats>,
}

impl BlockCache {
    /// Create a new BlockCache holding at most `capacity` blocks.
    ///
    /// A capacity of 0 disables caching entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: RwLock::new(LruState { entries: HashMap::new(), queue: VecDeque::new() }),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Get a block from the cache.
    ///
    /// A hit moves the entry to the most recently used position.
    pub fn get(&self, sst_id: u64, block_idx: usize) -> Option<Arc<Block>> {
        self.stats.write().lookups += 1;

        if self.capacity == 0 {
            self.stats.write().misses += 1;
            return None;
        }

        let key = CacheKey::new(sst_id, block_idx);
        let mut state = self.state.write();
        if let Some(block) = state.entries.get(&key).cloned() {
            // Move to the back of the queue (most recently used).
            if let Some(pos) = state.queue.iter().position(|k| *k == key) {
                state.queue.remove(pos);
            }
            state.queue.push_back(key);
            self.stats.write().hits += 1;
            Some(block)
        } else {
            self.stats.write().misses += 1;
            None
        }
    }

    /// Insert a block into the cache, evicting least recently used
    /// entries when at capacity.
    pub fn put(&self, sst_id: u64, block_idx: usize, block: Arc<Block>) {
        if self.capacity == 0 {
            return;
        }

        let key = CacheKey::new(sst_id, block_idx);
        let mut state = self.state.write();

        if state.entries.insert(key, block).is_none() {
            state.queue.push_back(key);
        } else if let Some(pos) = state.queue.iter().position(|k| *k == key) {
            state.queue.remove(pos);
            state.queue.push_back(key);
        }
        self.stats.write().insertions += 1;

        while state.entries.len() > self.capacity {
            let Some(victim) = state.queue.pop_front() else { break };
            state.entries.remove(&victim);
            self.stats.write().evictions += 1;
        }
    }

    /// Drop every cached block belonging to the given SST.
    pub fn evict_sst(&self, sst_id: u64) {
        let mut state = self.state.write();
        state.entries.retain(|k, _| k.sst_id != sst_id);
        state.queue.retain(|k| k.sst_id != sst_id);
    }

    /// Number of blocks currently cached.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }
}
