//! Block format implementation for SST files.
//!
//! A block holds a sorted run of (key, value, txid) entries followed by
//! an offset table, so lookups binary-search the offsets instead of
//! scanning the data segment.

use crate::error::{Error, Result};
use crate::iterator::{IteratorKind, StorageIterator};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;

/// Per-entry fixed overhead: key_len + val_len + offset slot (u16 each).
const ENTRY_U16S: usize = 3 * 2;
/// Size of the per-entry transaction id.
const TXID_SIZE: usize = 8;

/// Block stores sorted (key, value, txid) entries with an offset table.
///
/// Format:
/// ```text
/// [Entry 1]
/// [Entry 2]
/// ...
/// [Entry N]
/// [Offset 1: u16]
/// ...
/// [Offset N: u16]
/// [Num Entries: u16]
/// [CRC32: u32]        // present iff encoded with_hash
/// ```
///
/// Each entry format:
/// ```text
/// [key_len: u16][key bytes][value_len: u16][value bytes][txid: u64]
/// ```
///
/// All integers are little-endian. An empty value is a tombstone. The
/// builder appends entries in non-decreasing key order; equal keys are
/// grouped, ordered as the feeding skiplist dumps them (newest first).
#[derive(Debug, Clone)]
pub struct Block {
    data: Vec<u8>,
    offsets: Vec<u16>,
    capacity: usize,
}

impl Block {
    /// Create an empty block with the given soft capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self { data: Vec::new(), offsets: Vec::new(), capacity }
    }

    /// Append an entry if it fits.
    ///
    /// "Fits" means the encoded size stays within capacity, OR the block
    /// is empty (a single oversize entry is always accepted so the
    /// builder can make progress), OR `force_write` is set. Returns false
    /// on rejection without modifying the block.
    pub fn add_entry(&mut self, key: &[u8], value: &[u8], txid: u64, force_write: bool) -> bool {
        if key.len() > u16::MAX as usize || value.len() > u16::MAX as usize {
            return false;
        }
        // Offsets are u16; a forced overrun past that range cannot be encoded.
        if self.data.len() > u16::MAX as usize {
            return false;
        }

        let entry_size = key.len() + value.len() + ENTRY_U16S + TXID_SIZE;
        if !force_write
            && !self.offsets.is_empty()
            && self.current_size() + entry_size > self.capacity
        {
            return false;
        }

        let offset = self.data.len() as u16;
        self.data.put_u16_le(key.len() as u16);
        self.data.put_slice(key);
        self.data.put_u16_le(value.len() as u16);
        self.data.put_slice(value);
        self.data.put_u64_le(txid);
        self.offsets.push(offset);
        true
    }

    /// Encoded size of the block as it stands (data, offsets, count).
    pub fn current_size(&self) -> usize {
        self.data.len() + self.offsets.len() * 2 + 2
    }

    /// Check if the block has no entries.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Number of entries in the block.
    pub fn num_entries(&self) -> usize {
        self.offsets.len()
    }

    /// Encode the block to its canonical byte layout.
    ///
    /// With `with_hash`, a CRC32 of every preceding byte is appended.
    pub fn encode(&self, with_hash: bool) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.current_size() + 4);
        buf.put_slice(&self.data);
        for offset in &self.offsets {
            buf.put_u16_le(*offset);
        }
        buf.put_u16_le(self.offsets.len() as u16);
        if with_hash {
            let hash = crc32fast::hash(&buf);
            buf.put_u32_le(hash);
        }
        buf.freeze()
    }

    /// Decode a block from its canonical byte layout.
    ///
    /// Verifies the trailing hash when `with_hash` is set; mismatches and
    /// truncated input are corruption errors.
    pub fn decode(encoded: &[u8], with_hash: bool) -> Result<Self> {
        let mut len = encoded.len();
        if with_hash {
            if len < 4 + 2 {
                return Err(Error::corrupted_block("data too small for hash and count"));
            }
            let stored = u32::from_le_bytes(encoded[len - 4..].try_into().unwrap());
            let computed = crc32fast::hash(&encoded[..len - 4]);
            if stored != computed {
                return Err(Error::ChecksumMismatch { expected: stored, actual: computed });
            }
            len -= 4;
        }
        if len < 2 {
            return Err(Error::corrupted_block("data too small for entry count"));
        }

        let count = u16::from_le_bytes(encoded[len - 2..len].try_into().unwrap()) as usize;
        let offsets_size = count * 2;
        if len - 2 < offsets_size {
            return Err(Error::corrupted_block("offset table larger than block"));
        }

        let data_end = len - 2 - offsets_size;
        let mut offsets_buf = &encoded[data_end..len - 2];
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(offsets_buf.get_u16_le());
        }

        let block = Self {
            data: encoded[..data_end].to_vec(),
            offsets,
            capacity: crate::config::BLOCK_SIZE,
        };

        // Every offset must start a parseable entry within the data segment.
        for idx in 0..count {
            block.check_entry(idx)?;
        }

        Ok(block)
    }

    fn check_entry(&self, idx: usize) -> Result<()> {
        let start = self.offsets[idx] as usize;
        let data = &self.data;
        if start + 2 > data.len() {
            return Err(Error::corrupted_block("entry offset out of range"));
        }
        let key_len = u16::from_le_bytes(data[start..start + 2].try_into().unwrap()) as usize;
        let value_len_pos = start + 2 + key_len;
        if value_len_pos + 2 > data.len() {
            return Err(Error::corrupted_block("entry key out of range"));
        }
        let value_len =
            u16::from_le_bytes(data[value_len_pos..value_len_pos + 2].try_into().unwrap()) as usize;
        if value_len_pos + 2 + value_len + TXID_SIZE > data.len() {
            return Err(Error::corrupted_block("entry value out of range"));
        }
        Ok(())
    }

    /// Key bytes of the entry at `idx`.
    pub(crate) fn key_slice(&self, idx: usize) -> &[u8] {
        let start = self.offsets[idx] as usize;
        let key_len = u16::from_le_bytes(self.data[start..start + 2].try_into().unwrap()) as usize;
        &self.data[start + 2..start + 2 + key_len]
    }

    /// Value bytes of the entry at `idx`.
    pub(crate) fn value_slice(&self, idx: usize) -> &[u8] {
        let start = self.offsets[idx] as usize;
        let key_len = u16::from_le_bytes(self.data[start..start + 2].try_into().unwrap()) as usize;
        let value_pos = start + 2 + key_len;
        let value_len =
            u16::from_le_bytes(self.data[value_pos..value_pos + 2].try_into().unwrap()) as usize;
        &self.data[value_pos + 2..value_pos + 2 + value_len]
    }

    /// Transaction id of the entry at `idx`.
    pub fn txid_at(&self, idx: usize) -> u64 {
        let start = self.offsets[idx] as usize;
        let key_len = u16::from_le_bytes(self.data[start..start + 2].try_into().unwrap()) as usize;
        let value_pos = start + 2 + key_len;
        let value_len =
            u16::from_le_bytes(self.data[value_pos..value_pos + 2].try_into().unwrap()) as usize;
        let txid_pos = value_pos + 2 + value_len;
        u64::from_le_bytes(self.data[txid_pos..txid_pos + TXID_SIZE].try_into().unwrap())
    }

    /// Owned (key, value, txid) triple of the entry at `idx`.
    pub fn entry_at(&self, idx: usize) -> (Bytes, Bytes, u64) {
        (
            Bytes::copy_from_slice(self.key_slice(idx)),
            Bytes::copy_from_slice(self.value_slice(idx)),
            self.txid_at(idx),
        )
    }

    /// First key in the block, if any.
    pub fn first_key(&self) -> Option<Bytes> {
        if self.offsets.is_empty() {
            return None;
        }
        Some(Bytes::copy_from_slice(self.key_slice(0)))
    }

    /// First and last keys in the block, if any.
    pub fn first_and_last_key(&self) -> Option<(Bytes, Bytes)> {
        if self.offsets.is_empty() {
            return None;
        }
        Some((
            Bytes::copy_from_slice(self.key_slice(0)),
            Bytes::copy_from_slice(self.key_slice(self.offsets.len() - 1)),
        ))
    }

    /// Index of the first entry with `key >= target`.
    fn lower_bound(&self, target: &[u8]) -> usize {
        let mut left = 0;
        let mut right = self.offsets.len();
        while left < right {
            let mid = left + (right - left) / 2;
            if self.key_slice(mid) < target {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        left
    }

    /// Binary search for an exact key match.
    ///
    /// Returns the index of the first entry holding the key (equal keys
    /// are adjacent; callers scan neighbors for the version they want).
    pub fn find_entry_idx(&self, key: &[u8]) -> Option<usize> {
        let idx = self.lower_bound(key);
        if idx < self.offsets.len() && self.key_slice(idx) == key {
            Some(idx)
        } else {
            None
        }
    }

    /// Check whether any version of `key` is stored in the block.
    pub fn key_exists(&self, key: &[u8]) -> bool {
        self.find_entry_idx(key).is_some()
    }

    /// Smallest index whose key starts with `prefix`, if any.
    ///
    /// The search is on keys only; snapshot filtering is the iterators'
    /// concern.
    pub fn prefix_lower_bound(&self, prefix: &[u8]) -> Option<usize> {
        let idx = self.lower_bound(prefix);
        if idx < self.offsets.len() && self.key_slice(idx).starts_with(prefix) {
            Some(idx)
        } else {
            None
        }
    }

    /// Smallest index past the run of keys starting with `prefix`
    /// (`num_entries()` when the run reaches the end of the block).
    pub fn prefix_upper_bound(&self, prefix: &[u8]) -> usize {
        let mut left = 0;
        let mut right = self.offsets.len();
        while left < right {
            let mid = left + (right - left) / 2;
            let mid_key = self.key_slice(mid);
            if mid_key < prefix || mid_key.starts_with(prefix) {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        left
    }

    /// All entries whose key starts with `prefix` and whose txid is
    /// visible at `read_txid` (0 means every version).
    pub fn prefix_range(&self, prefix: &[u8], read_txid: u64) -> Vec<(Bytes, Bytes, u64)> {
        let Some(begin) = self.prefix_lower_bound(prefix) else {
            return Vec::new();
        };
        let end = self.prefix_upper_bound(prefix);
        let mut result = Vec::new();
        for idx in begin..end {
            let txid = self.txid_at(idx);
            if read_txid == 0 || txid <= read_txid {
                result.push(self.entry_at(idx));
            }
        }
        result
    }

    /// Cursor over the whole block at the given snapshot.
    pub fn iter(self: &Arc<Self>, snapshot: u64) -> BlockIterator {
        BlockIterator::new(Arc::clone(self), 0, self.offsets.len(), snapshot)
    }

    /// Cursor positioned at the lower bound for `key` under `snapshot`.
    pub fn iter_from(self: &Arc<Self>, key: &[u8], snapshot: u64) -> BlockIterator {
        let start = self.lower_bound(key);
        BlockIterator::new(Arc::clone(self), start, self.offsets.len(), snapshot)
    }

    /// Cursor over the run of keys starting with `prefix`.
    pub fn prefix_iter(self: &Arc<Self>, prefix: &[u8], snapshot: u64) -> BlockIterator {
        match self.prefix_lower_bound(prefix) {
            Some(begin) => {
                let end = self.prefix_upper_bound(prefix);
                BlockIterator::new(Arc::clone(self), begin, end, snapshot)
            }
            None => BlockIterator::new(Arc::clone(self), self.offsets.len(), self.offsets.len(), snapshot),
        }
    }
}

/// Forward cursor over a block's entries.
///
/// Entries whose txid exceeds the snapshot are skipped (a snapshot of 0
/// disables the filter). The cursor compares by (block identity, index).
#[derive(Clone)]
pub struct BlockIterator {
    block: Arc<Block>,
    idx: usize,
    end: usize,
    snapshot: u64,
}

impl BlockIterator {
    fn new(block: Arc<Block>, idx: usize, end: usize, snapshot: u64) -> Self {
        let mut iter = Self { block, idx, end, snapshot };
        iter.skip_invisible();
        iter
    }

    fn skip_invisible(&mut self) {
        if self.snapshot == 0 {
            return;
        }
        while self.idx < self.end && self.block.txid_at(self.idx) > self.snapshot {
            self.idx += 1;
        }
    }

    /// Index of the current entry within the block.
    pub fn index(&self) -> usize {
        self.idx
    }

    /// The block this cursor reads from.
    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }

    /// Owned (key, value) pair of the current entry.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub fn entry(&self) -> (Bytes, Bytes) {
        assert!(self.valid(), "Iterator not valid");
        let (key, value, _) = self.block.entry_at(self.idx);
        (key, value)
    }
}

impl StorageIterator for BlockIterator {
    fn valid(&self) -> bool {
        self.idx < self.end
    }

    fn advance(&mut self) {
        if self.idx < self.end {
            self.idx += 1;
            self.skip_invisible();
        }
    }

    fn key(&self) -> &[u8] {
        assert!(self.valid(), "Iterator not valid");
        self.block.key_slice(self.idx)
    }

    fn value(&self) -> &[u8] {
        assert!(self.valid(), "Iterator not valid");
        self.block.value_slice(self.idx)
    }

    fn txid(&self) -> u64 {
        assert!(self.valid(), "Iterator not valid");
        self.block.txid_at(self.idx)
    }

    fn snapshot_txid(&self) -> u64 {
        self.snapshot
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::Block
    }
}

impl PartialEq for BlockIterator {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
            && self.idx == other.idx
            && self.snapshot == other.snapshot
    }
}

impl Eq for BlockIterator {}

impl PartialOrd for BlockIterator {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        let lhs = (Arc::as_ptr(&self.block) as usize, self.idx, self.snapshot);
        let rhs = (Arc::as_ptr(&other.block) as usize, other.idx, other.snapshot);
        Some(lhs.cmp(&rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        let mut block = Block::new(4096);
        assert!(block.add_entry(b"apple", b"red", 10, false));
        assert!(block.add_entry(b"banana", b"old", 10, false));
        assert!(block.add_entry(b"banana", b"yellow", 20, true));
        assert!(block.add_entry(b"cherry", b"dark", 10, false));
        block
    }

    #[test]
    fn test_block_empty() {
        let block = Block::new(4096);
        assert!(block.is_empty());
        assert!(block.first_key().is_none());
        assert!(block.find_entry_idx(b"anything").is_none());
        assert_eq!(block.prefix_range(b"a", 0), vec![]);

        let block = Arc::new(block);
        assert!(!block.iter(0).valid());
    }

    #[test]
    fn test_block_encode_decode_roundtrip() {
        let block = sample_block();
        let encoded = block.encode(true);
        let decoded = Block::decode(&encoded, true).unwrap();

        assert_eq!(decoded.num_entries(), block.num_entries());
        for idx in 0..block.num_entries() {
            assert_eq!(decoded.entry_at(idx), block.entry_at(idx));
        }
    }

    #[test]
    fn test_block_encode_decode_without_hash() {
        let block = sample_block();
        let encoded = block.encode(false);
        let decoded = Block::decode(&encoded, false).unwrap();
        assert_eq!(decoded.num_entries(), 4);
    }

    #[test]
    fn test_block_decode_detects_corruption() {
        let block = sample_block();
        let mut encoded = block.encode(true).to_vec();
        encoded[3] ^= 0xFF;

        let result = Block::decode(&encoded, true);
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_block_decode_too_short() {
        assert!(Block::decode(&[0u8; 1], false).is_err());
        assert!(Block::decode(&[0u8; 5], true).is_err());
    }

    #[test]
    fn test_capacity_rejection_and_force() {
        // Scenario: a tiny block rejects the overflowing entry unless forced.
        let mut block = Block::new(64);
        assert!(block.add_entry(b"k1", b"v1", 1, false));

        let big_value = vec![b'x'; 50];
        assert!(!block.add_entry(b"k2", &big_value, 2, false));
        assert_eq!(block.num_entries(), 1);

        assert!(block.add_entry(b"k2", &big_value, 2, true));
        assert_eq!(block.num_entries(), 2);

        let decoded = Block::decode(&block.encode(true), true).unwrap();
        assert_eq!(decoded.num_entries(), 2);
        assert_eq!(decoded.entry_at(1).1.as_ref(), big_value.as_slice());
    }

    #[test]
    fn test_oversize_entry_accepted_when_empty() {
        let mut block = Block::new(16);
        let big_value = vec![b'x'; 64];
        assert!(block.add_entry(b"k", &big_value, 1, false));
    }

    #[test]
    fn test_first_and_last_key() {
        let block = sample_block();
        let (first, last) = block.first_and_last_key().unwrap();
        assert_eq!(first.as_ref(), b"apple");
        assert_eq!(last.as_ref(), b"cherry");
    }

    #[test]
    fn test_find_entry_idx() {
        let block = sample_block();
        assert_eq!(block.find_entry_idx(b"apple"), Some(0));
        // Ties on equal keys resolve to the first of the group.
        assert_eq!(block.find_entry_idx(b"banana"), Some(1));
        assert_eq!(block.find_entry_idx(b"missing"), None);
        assert!(block.key_exists(b"cherry"));
        assert!(!block.key_exists(b"durian"));
    }

    #[test]
    fn test_prefix_bounds() {
        let block = sample_block();
        assert_eq!(block.prefix_lower_bound(b"ba"), Some(1));
        assert_eq!(block.prefix_upper_bound(b"ba"), 3);
        assert_eq!(block.prefix_lower_bound(b"zz"), None);
        assert_eq!(block.prefix_lower_bound(b""), Some(0));
        assert_eq!(block.prefix_upper_bound(b""), 4);
    }

    #[test]
    fn test_prefix_range_mvcc() {
        let block = sample_block();

        let all = block.prefix_range(b"banana", 0);
        assert_eq!(all.len(), 2);

        let at_15 = block.prefix_range(b"banana", 15);
        assert_eq!(at_15.len(), 1);
        assert_eq!(at_15[0].1.as_ref(), b"old");
    }

    #[test]
    fn test_block_iterator_snapshot_skip() {
        let block = Arc::new(sample_block());

        let mut iter = block.iter(10);
        let mut seen = Vec::new();
        while iter.valid() {
            seen.push((iter.key().to_vec(), iter.txid()));
            iter.advance();
        }
        assert_eq!(
            seen,
            vec![
                (b"apple".to_vec(), 10),
                (b"banana".to_vec(), 10),
                (b"cherry".to_vec(), 10),
            ]
        );
    }

    #[test]
    fn test_block_iterator_from_key() {
        let block = Arc::new(sample_block());
        let iter = block.iter_from(b"banana", 0);
        assert!(iter.valid());
        assert_eq!(iter.key(), b"banana");

        let iter = block.iter_from(b"zebra", 0);
        assert!(!iter.valid());
    }

    #[test]
    fn test_block_prefix_iter_bounded() {
        let block = Arc::new(sample_block());
        let mut iter = block.prefix_iter(b"banana", 0);
        let mut count = 0;
        while iter.valid() {
            assert!(iter.key().starts_with(b"banana"));
            count += 1;
            iter.advance();
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_iterator_ordering() {
        let block = Arc::new(sample_block());
        let a = block.iter(0);
        let mut b = block.iter(0);
        assert!(a == b);
        b.advance();
        assert!(a < b);
    }
}
