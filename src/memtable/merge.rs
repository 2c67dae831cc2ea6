//! Merging iterator over the memtable's skiplists.
//!
//! Collapses K per-skiplist entry streams into a single key-ordered,
//! de-duplicated stream with MVCC visibility applied.

use crate::iterator::{IteratorKind, StorageIterator};
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Entry in the merge heap.
///
/// `source` ranks the originating skiplist: 0 is the current table,
/// higher values are older frozen tables. Later-written entries shadow
/// older ones when key and txid collide.
struct MergeEntry {
    key: Bytes,
    value: Bytes,
    txid: u64,
    source: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.txid == other.txid && self.source == other.source
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: smallest key first, then newest txid, then the
        // youngest source.
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.txid.cmp(&other.txid))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Key-ordered, de-duplicated cursor over a memtable's skiplists.
///
/// Yielded keys are strictly increasing; each key carries its newest
/// version visible at the read snapshot, and keys whose newest visible
/// version is a tombstone are skipped entirely. The cursor is
/// forward-only and single-pass.
pub struct MemTableIterator {
    heap: BinaryHeap<MergeEntry>,
    current: Option<(Bytes, Bytes, u64)>,
    read_txid: u64,
}

impl MemTableIterator {
    /// Build the iterator from per-skiplist entry runs, ranked newest
    /// source first.
    ///
    /// Entries invisible at `read_txid` are dropped at insertion
    /// (`read_txid == 0` keeps everything).
    pub(crate) fn new(sources: Vec<Vec<(Bytes, Bytes, u64)>>, read_txid: u64) -> Self {
        let mut heap = BinaryHeap::new();
        for (source, entries) in sources.into_iter().enumerate() {
            for (key, value, txid) in entries {
                if read_txid == 0 || txid <= read_txid {
                    heap.push(MergeEntry { key, value, txid, source });
                }
            }
        }
        let mut iter = Self { heap, current: None, read_txid };
        iter.pull_next();
        iter
    }

    /// Pop the next key group and surface its newest visible version,
    /// skipping tombstoned keys.
    fn pull_next(&mut self) {
        self.current = None;
        while let Some(top) = self.heap.pop() {
            // Drain every queued version of this key.
            while self
                .heap
                .peek()
                .map(|e| e.key == top.key)
                .unwrap_or(false)
            {
                self.heap.pop();
            }
            if top.value.is_empty() {
                // Deleted under this snapshot.
                continue;
            }
            self.current = Some((top.key, top.value, top.txid));
            return;
        }
    }

    /// Owned (key, value, txid) triple of the current entry.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub fn entry(&self) -> (Bytes, Bytes, u64) {
        self.current.clone().expect("Iterator not valid")
    }
}

impl StorageIterator for MemTableIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn advance(&mut self) {
        if self.current.is_some() {
            self.pull_next();
        }
    }

    fn key(&self) -> &[u8] {
        &self.current.as_ref().expect("Iterator not valid").0
    }

    fn value(&self) -> &[u8] {
        &self.current.as_ref().expect("Iterator not valid").1
    }

    fn txid(&self) -> u64 {
        self.current.as_ref().expect("Iterator not valid").2
    }

    fn snapshot_txid(&self) -> u64 {
        self.read_txid
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::MemTable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &[u8], value: &[u8], txid: u64) -> (Bytes, Bytes, u64) {
        (Bytes::copy_from_slice(key), Bytes::copy_from_slice(value), txid)
    }

    fn drain(mut iter: MemTableIterator) -> Vec<(Vec<u8>, Vec<u8>, u64)> {
        let mut out = Vec::new();
        while iter.valid() {
            out.push((iter.key().to_vec(), iter.value().to_vec(), iter.txid()));
            iter.advance();
        }
        out
    }

    #[test]
    fn test_empty_sources() {
        let iter = MemTableIterator::new(vec![], 100);
        assert!(!iter.valid());

        let iter = MemTableIterator::new(vec![vec![], vec![]], 100);
        assert!(!iter.valid());
    }

    #[test]
    fn test_merge_disjoint_sources() {
        let iter = MemTableIterator::new(
            vec![
                vec![entry(b"a", b"1", 10), entry(b"c", b"3", 10)],
                vec![entry(b"b", b"2", 10), entry(b"d", b"4", 10)],
            ],
            100,
        );
        let out = drain(iter);
        let keys: Vec<_> = out.iter().map(|(k, _, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn test_dedup_prefers_newest_version() {
        let iter = MemTableIterator::new(
            vec![
                vec![entry(b"a", b"new", 20)],
                vec![entry(b"a", b"old", 10), entry(b"b", b"vb", 10)],
            ],
            100,
        );
        let out = drain(iter);
        assert_eq!(
            out,
            vec![(b"a".to_vec(), b"new".to_vec(), 20), (b"b".to_vec(), b"vb".to_vec(), 10)]
        );
    }

    #[test]
    fn test_snapshot_filters_at_insertion() {
        let iter = MemTableIterator::new(
            vec![vec![entry(b"a", b"new", 20), entry(b"a", b"old", 10)]],
            15,
        );
        let out = drain(iter);
        assert_eq!(out, vec![(b"a".to_vec(), b"old".to_vec(), 10)]);
    }

    #[test]
    fn test_tombstone_skips_key() {
        // Tombstone at txid 20 masks the older value; "b" survives.
        let iter = MemTableIterator::new(
            vec![
                vec![entry(b"a", b"", 20)],
                vec![entry(b"a", b"va", 10), entry(b"b", b"vb", 10)],
            ],
            100,
        );
        let out = drain(iter);
        assert_eq!(out, vec![(b"b".to_vec(), b"vb".to_vec(), 10)]);
    }

    #[test]
    fn test_tombstone_invisible_under_old_snapshot() {
        let iter = MemTableIterator::new(
            vec![
                vec![entry(b"a", b"", 20)],
                vec![entry(b"a", b"va", 10)],
            ],
            15,
        );
        let out = drain(iter);
        assert_eq!(out, vec![(b"a".to_vec(), b"va".to_vec(), 10)]);
    }

    #[test]
    fn test_same_txid_prefers_younger_source() {
        let iter = MemTableIterator::new(
            vec![
                vec![entry(b"a", b"current", 10)],
                vec![entry(b"a", b"frozen", 10)],
            ],
            100,
        );
        let out = drain(iter);
        assert_eq!(out, vec![(b"a".to_vec(), b"current".to_vec(), 10)]);
    }

    #[test]
    fn test_keys_strictly_increasing() {
        let iter = MemTableIterator::new(
            vec![
                (0..50).map(|i| entry(format!("k{:03}", i).as_bytes(), b"a", 5)).collect(),
                (25..75).map(|i| entry(format!("k{:03}", i).as_bytes(), b"b", 3)).collect(),
            ],
            100,
        );
        let out = drain(iter);
        assert_eq!(out.len(), 75);
        for pair in out.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }
}
