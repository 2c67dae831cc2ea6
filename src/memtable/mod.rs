//! # MemTable - the in-memory write path
//!
//! The MemTable owns one mutable "current" skiplist plus a FIFO list of
//! frozen skiplists awaiting flush. Writes land in the current table;
//! when it outgrows its threshold it is atomically frozen and a fresh
//! table installed. Reads consult the current table first, then the
//! frozen tables newest-first.
//!
//! ## Locking
//!
//! Two reader/writer locks, one per list. The current-lock is always
//! acquired before the frozen-lock when both are needed; the skiplist
//! itself has no internal synchronization, so this discipline is the
//! sole serializer.

mod merge;

pub use merge::MemTableIterator;

use crate::config::MAX_MEMTABLE_SIZE;
use crate::iterator::StorageIterator;
use crate::skiplist::{Skiplist, SkiplistStatus};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

struct FrozenList {
    /// Frozen skiplists, newest at the front.
    tables: VecDeque<Arc<Skiplist>>,
    /// Sum of the frozen skiplists' sizes.
    fixed_bytes: u64,
}

/// In-memory staging area for writes, ahead of the SSTs.
///
/// A reader at snapshot T sees the newest version with `txid <= T`
/// across all skiplists, preferring the current table over the frozen
/// ones front-to-back.
pub struct MemTable {
    current: RwLock<Skiplist>,
    frozen: RwLock<FrozenList>,
    /// Freeze threshold for the current skiplist, in bytes.
    freeze_threshold: usize,
}

impl MemTable {
    /// Creates an empty memtable with the default freeze threshold.
    pub fn new() -> Self {
        Self::with_freeze_threshold(MAX_MEMTABLE_SIZE)
    }

    /// Creates an empty memtable configured from `options`.
    pub fn with_options(options: &crate::Options) -> Self {
        Self::with_freeze_threshold(options.memtable_size)
    }

    /// Creates an empty memtable freezing the current skiplist once it
    /// exceeds `threshold` bytes.
    pub fn with_freeze_threshold(threshold: usize) -> Self {
        Self {
            current: RwLock::new(Skiplist::new()),
            frozen: RwLock::new(FrozenList { tables: VecDeque::new(), fixed_bytes: 0 }),
            freeze_threshold: threshold,
        }
    }

    /// Inserts a version of `key`. An empty value is a tombstone.
    pub fn put(&self, key: &[u8], value: &[u8], txid: u64) {
        let over_threshold = {
            let mut current = self.current.write();
            current.insert(key, value, txid);
            current.size_bytes() > self.freeze_threshold
        };
        if over_threshold {
            self.freeze_current();
        }
    }

    /// Inserts several pairs under a single lock acquisition.
    pub fn put_batch(&self, pairs: &[(&[u8], &[u8])], txid: u64) {
        let over_threshold = {
            let mut current = self.current.write();
            for (key, value) in pairs {
                current.insert(key, value, txid);
            }
            current.size_bytes() > self.freeze_threshold
        };
        if over_threshold {
            self.freeze_current();
        }
    }

    /// Deletes `key` at `txid` by writing a tombstone.
    pub fn remove(&self, key: &[u8], txid: u64) {
        self.put(key, b"", txid);
    }

    /// Deletes several keys under a single lock acquisition.
    pub fn remove_batch(&self, keys: &[&[u8]], txid: u64) {
        let pairs: Vec<(&[u8], &[u8])> = keys.iter().map(|k| (*k, &b""[..])).collect();
        self.put_batch(&pairs, txid);
    }

    /// Resolves `key` at `read_txid` (0 means unfiltered).
    ///
    /// The current table is consulted first, then the frozen tables
    /// newest-first. The first resolved version wins: a tombstone
    /// short-circuits to `None` without consulting older tables.
    pub fn get(&self, key: &[u8], read_txid: u64) -> Option<(Bytes, u64)> {
        {
            let current = self.current.read();
            if let Some((value, txid)) = current.get_version(key, read_txid) {
                if value.is_empty() {
                    return None;
                }
                return Some((value, txid));
            }
        }

        let frozen = self.frozen.read();
        for table in &frozen.tables {
            if let Some((value, txid)) = table.get_version(key, read_txid) {
                if value.is_empty() {
                    return None;
                }
                return Some((value, txid));
            }
        }
        None
    }

    /// Resolves each key in order; misses stay `None`.
    pub fn get_batch(&self, keys: &[&[u8]], read_txid: u64) -> Vec<Option<(Bytes, u64)>> {
        keys.iter().map(|key| self.get(key, read_txid)).collect()
    }

    /// Merged cursor over every key starting with `prefix`, visible at
    /// `read_txid`.
    ///
    /// Both read locks are held only for the collection phase; the
    /// returned iterator is detached from the memtable.
    pub fn prefix_search(&self, prefix: &[u8], read_txid: u64) -> MemTableIterator {
        let mut sources = Vec::new();

        let current = self.current.read();
        sources.push(collect_prefix(&current, prefix));
        drop(current);

        let frozen = self.frozen.read();
        for table in &frozen.tables {
            sources.push(collect_prefix(table, prefix));
        }
        drop(frozen);

        MemTableIterator::new(sources, read_txid)
    }

    /// Merged cursor over the whole memtable at `read_txid`.
    ///
    /// An empty memtable yields an immediately exhausted iterator.
    pub fn scan(&self, read_txid: u64) -> MemTableIterator {
        self.prefix_search(b"", read_txid)
    }

    /// Moves the current skiplist to the front of the frozen list and
    /// installs a fresh one. No-op when the current table is empty.
    pub fn freeze_current(&self) {
        let mut current = self.current.write();
        if current.is_empty() {
            return;
        }
        current.set_status(SkiplistStatus::Freezing);
        let mut old = std::mem::take(&mut *current);
        old.set_status(SkiplistStatus::Frozen);

        // Lock order: current before frozen.
        let mut frozen = self.frozen.write();
        frozen.fixed_bytes += old.size_bytes() as u64;
        frozen.tables.push_front(Arc::new(old));
    }

    /// Freezes the current skiplist, then hands the OLDEST frozen
    /// skiplist to the caller for SST construction.
    ///
    /// Returns an empty skiplist when nothing is frozen; callers check
    /// `is_empty()` before building.
    pub fn flush(&self) -> Arc<Skiplist> {
        self.freeze_current();

        let mut frozen = self.frozen.write();
        match frozen.tables.pop_back() {
            Some(table) => {
                frozen.fixed_bytes -= table.size_bytes() as u64;
                table
            }
            None => Arc::new(Skiplist::new()),
        }
    }

    /// Freezes the current skiplist, then drains every frozen skiplist,
    /// oldest first.
    pub fn flush_sync(&self) -> Vec<Arc<Skiplist>> {
        self.freeze_current();

        let mut frozen = self.frozen.write();
        frozen.fixed_bytes = 0;
        frozen.tables.drain(..).rev().collect()
    }

    /// Whether the current skiplist has outgrown the freeze threshold.
    pub fn is_full(&self) -> bool {
        self.current.read().size_bytes() > self.freeze_threshold
    }

    /// Estimated bytes held by the current skiplist.
    pub fn current_size(&self) -> u64 {
        self.current.read().size_bytes() as u64
    }

    /// Sum of the frozen skiplists' sizes.
    pub fn fixed_size(&self) -> u64 {
        self.frozen.read().fixed_bytes
    }

    /// Total estimated resident bytes.
    pub fn total_size(&self) -> u64 {
        self.current_size() + self.fixed_size()
    }

    /// Number of frozen skiplists awaiting flush.
    pub fn frozen_count(&self) -> usize {
        self.frozen.read().tables.len()
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_prefix(table: &Skiplist, prefix: &[u8]) -> Vec<(Bytes, Bytes, u64)> {
    let mut entries = Vec::new();
    let mut iter = if prefix.is_empty() { table.iter() } else { table.prefix_iter(prefix) };
    while iter.valid() {
        entries.push(iter.entry());
        iter.advance();
    }
    entries
}
