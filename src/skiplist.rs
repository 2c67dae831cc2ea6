//! Multi-version skiplist backing the memtable.
//!
//! The skiplist is an ordered multimap: several versions of one key
//! coexist, each tagged with the transaction id that wrote it. Level-0
//! order is key ascending, and txid descending within one key, so the
//! newest version of a key is always encountered first.
//!
//! Nodes live in an index arena rather than behind shared pointers; a
//! node handle is a `usize` into the arena. The list performs no
//! internal locking — the memtable's lock discipline is the single
//! serializer (one writer at a time, readers behind the read lock).

use crate::config::{MAX_LEVEL, SKIPLIST_P};
use crate::iterator::{IteratorKind, StorageIterator};
use bytes::Bytes;
use rand::Rng;

/// Number of buckets used by [`Skiplist::range_bucket`].
const MAX_RANGES: usize = 256;

/// Arena handle meaning "no node".
const NIL: usize = usize::MAX;

/// Lifecycle state of a skiplist inside the memtable.
///
/// `Normal → Freezing → Frozen`; flushing a frozen skiplist is the only
/// way out of `Frozen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkiplistStatus {
    /// Mutable, owned by the memtable's writer.
    Normal,
    /// Being moved onto the frozen list.
    Freezing,
    /// Immutable; awaiting flush.
    Frozen,
}

struct Node {
    key: Bytes,
    value: Bytes,
    txid: u64,
    /// Forward pointers, one per level in `[0, height)`.
    forward: Vec<usize>,
}

impl Node {
    fn height(&self) -> usize {
        self.forward.len()
    }
}

/// A probabilistic ordered multimap from key to (value, txid) versions.
///
/// An empty value is a tombstone. Lookups resolve the newest version
/// with `txid <= read_txid`; `read_txid == 0` disables the filter and is
/// used by flush and maintenance paths.
pub struct Skiplist {
    /// Node arena; `nodes[0]` is the head sentinel.
    nodes: Vec<Node>,
    /// Highest level currently in use.
    level: usize,
    /// Estimated resident bytes, `(key + value + 8) * height` per node.
    size_bytes: usize,
    status: SkiplistStatus,
}

impl Skiplist {
    /// Creates an empty skiplist.
    pub fn new() -> Self {
        let head = Node {
            key: Bytes::new(),
            value: Bytes::new(),
            txid: 0,
            forward: vec![NIL; MAX_LEVEL],
        };
        Self { nodes: vec![head], level: 1, size_bytes: 0, status: SkiplistStatus::Normal }
    }

    /// Returns true when a node sorts strictly before the (key, txid)
    /// position. Equal keys order by txid descending.
    fn precedes(&self, idx: usize, key: &[u8], txid: u64) -> bool {
        let node = &self.nodes[idx];
        match node.key.as_ref().cmp(key) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => node.txid > txid,
            std::cmp::Ordering::Greater => false,
        }
    }

    /// Descends from the top level, recording the rightmost node before
    /// the (key, txid) position at every level.
    fn find_position(&self, key: &[u8], txid: u64, update: &mut [usize; MAX_LEVEL]) -> usize {
        let mut current = 0;
        for i in (0..self.level).rev() {
            while self.nodes[current].forward[i] != NIL
                && self.precedes(self.nodes[current].forward[i], key, txid)
            {
                current = self.nodes[current].forward[i];
            }
            update[i] = current;
        }
        self.nodes[current].forward[0]
    }

    /// First node with `key >= target`, regardless of version.
    fn find_first_ge(&self, key: &[u8]) -> usize {
        let mut update = [0usize; MAX_LEVEL];
        self.find_position(key, u64::MAX, &mut update)
    }

    fn random_height() -> usize {
        let mut rng = rand::rng();
        let mut height = 1;
        while height < MAX_LEVEL && rng.random::<f64>() < SKIPLIST_P {
            height += 1;
        }
        height
    }

    /// Appends a version of `key`. An empty `value` is a tombstone.
    ///
    /// Returns true when a new version was inserted. If a version with
    /// the same `(key, txid)` already exists its value is overwritten in
    /// place and the call returns false.
    pub fn insert(&mut self, key: &[u8], value: &[u8], txid: u64) -> bool {
        let mut update = [0usize; MAX_LEVEL];
        let found = self.find_position(key, txid, &mut update);

        if found != NIL {
            let node = &self.nodes[found];
            if node.key.as_ref() == key && node.txid == txid {
                let height = node.height();
                let old_len = node.value.len();
                self.nodes[found].value = Bytes::copy_from_slice(value);
                self.size_bytes = self.size_bytes + value.len() * height - old_len * height;
                return false;
            }
        }

        let height = Self::random_height();
        let new_idx = self.nodes.len();
        let mut forward = vec![NIL; height];
        for (i, slot) in forward.iter_mut().enumerate() {
            *slot = self.nodes[update[i]].forward[i];
        }
        self.nodes.push(Node {
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
            txid,
            forward,
        });
        for i in 0..height {
            self.nodes[update[i]].forward[i] = new_idx;
        }

        self.level = self.level.max(height);
        self.size_bytes += (key.len() + value.len() + 8) * height;
        true
    }

    /// Physically unlinks the newest version of `key`, if any.
    ///
    /// This is a maintenance operation; the write path deletes with
    /// tombstones instead.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let mut update = [0usize; MAX_LEVEL];
        let target = self.find_position(key, u64::MAX, &mut update);
        if target == NIL || self.nodes[target].key.as_ref() != key {
            return false;
        }

        let height = self.nodes[target].height();
        for i in 0..height {
            if self.nodes[update[i]].forward[i] == target {
                self.nodes[update[i]].forward[i] = self.nodes[target].forward[i];
            }
        }
        let node = &self.nodes[target];
        self.size_bytes = self
            .size_bytes
            .saturating_sub((node.key.len() + node.value.len() + 8) * height);

        // Shrink the active level while its head pointer is empty.
        while self.level > 1 && self.nodes[0].forward[self.level - 1] == NIL {
            self.level -= 1;
        }
        true
    }

    /// Resolves the newest version of `key` with `txid <= read_txid`
    /// (every version when `read_txid == 0`), tombstones included.
    pub fn get_version(&self, key: &[u8], read_txid: u64) -> Option<(Bytes, u64)> {
        let mut idx = self.find_first_ge(key);
        while idx != NIL && self.nodes[idx].key.as_ref() == key {
            let node = &self.nodes[idx];
            if read_txid == 0 || node.txid <= read_txid {
                return Some((node.value.clone(), node.txid));
            }
            idx = node.forward[0];
        }
        None
    }

    /// Returns the visible value of `key` at `read_txid`, or `None` when
    /// the key is absent or its newest visible version is a tombstone.
    pub fn get(&self, key: &[u8], read_txid: u64) -> Option<Bytes> {
        match self.get_version(key, read_txid) {
            Some((value, _)) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    /// Cursor over every version in level-0 order.
    ///
    /// This is the flush order: key ascending, newest version of each
    /// key first. The skiplist itself is left untouched.
    pub fn iter(&self) -> SkiplistIter<'_> {
        SkiplistIter { list: self, current: self.nodes[0].forward[0], prefix: None, snapshot: 0 }
    }

    /// Cursor over the contiguous run of keys starting with `prefix`.
    ///
    /// The run ends at the first key that no longer carries the prefix
    /// (the `prefix ++ 0xFF` sentinel position).
    pub fn prefix_iter(&self, prefix: &[u8]) -> SkiplistIter<'_> {
        let start = self.find_first_ge(prefix);
        let mut iter = SkiplistIter {
            list: self,
            current: start,
            prefix: Some(Bytes::copy_from_slice(prefix)),
            snapshot: 0,
        };
        if !iter.in_prefix() {
            iter.current = NIL;
        }
        iter
    }

    /// Approximate partition bucket for `key`, in `[0, 256)`.
    pub fn range_bucket(&self, key: &[u8]) -> usize {
        key.first().copied().unwrap_or(0) as usize * MAX_RANGES / 256
    }

    /// Exact number of stored versions.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Returns true when no versions are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated resident memory in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> SkiplistStatus {
        self.status
    }

    /// Sets the lifecycle status.
    pub fn set_status(&mut self, status: SkiplistStatus) {
        self.status = status;
    }
}

impl Default for Skiplist {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward cursor over a skiplist's level-0 chain.
pub struct SkiplistIter<'a> {
    list: &'a Skiplist,
    current: usize,
    prefix: Option<Bytes>,
    snapshot: u64,
}

impl SkiplistIter<'_> {
    fn in_prefix(&self) -> bool {
        if self.current == NIL {
            return false;
        }
        match &self.prefix {
            Some(p) => self.list.nodes[self.current].key.starts_with(p.as_ref()),
            None => true,
        }
    }

    /// Returns the current entry as owned handles.
    pub fn entry(&self) -> (Bytes, Bytes, u64) {
        let node = &self.list.nodes[self.current];
        (node.key.clone(), node.value.clone(), node.txid)
    }
}

impl StorageIterator for SkiplistIter<'_> {
    fn valid(&self) -> bool {
        self.current != NIL
    }

    fn advance(&mut self) {
        if self.current == NIL {
            return;
        }
        self.current = self.list.nodes[self.current].forward[0];
        if !self.in_prefix() {
            self.current = NIL;
        }
    }

    fn key(&self) -> &[u8] {
        assert!(self.valid(), "Iterator not valid");
        &self.list.nodes[self.current].key
    }

    fn value(&self) -> &[u8] {
        assert!(self.valid(), "Iterator not valid");
        &self.list.nodes[self.current].value
    }

    fn txid(&self) -> u64 {
        assert!(self.valid(), "Iterator not valid");
        self.list.nodes[self.current].txid
    }

    fn snapshot_txid(&self) -> u64 {
        self.snapshot
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::Skiplist
    }
}
