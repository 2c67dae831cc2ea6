//! SST read path.
//!
//! Opens an immutable SST file, locates blocks through the meta table
//! and Bloom filter, and serves reads through the shared block cache.

use crate::cache::BlockCache;
use crate::error::{Error, Result};
use crate::file::FileObj;
use crate::filter::{BloomFilter, Filter};
use crate::iterator::{IteratorKind, StorageIterator};
use crate::sstable::block::{Block, BlockIterator};
use crate::sstable::meta::BlockMeta;
use crate::sstable::FOOTER_SIZE;
use bytes::Bytes;
use std::cmp::Ordering;
use std::sync::Arc;

/// An immutable on-disk sorted-string table.
///
/// Layout, top to bottom: data blocks, block-meta table, Bloom payload,
/// and a 24-byte footer `meta_offset:u32 | bloom_offset:u32 |
/// min_txid:u64 | max_txid:u64`.
pub struct Sstable {
    sst_id: u64,
    file: FileObj,
    block_metas: Vec<BlockMeta>,
    meta_offset: u32,
    first_key: Bytes,
    last_key: Bytes,
    bloom: Option<BloomFilter>,
    cache: Arc<BlockCache>,
    min_txid: u64,
    max_txid: u64,
}

impl Sstable {
    /// Open an SST from an existing file.
    ///
    /// Reads the footer, Bloom payload and block-meta table, validating
    /// the structural invariants; any violation is a
    /// [`Error::CorruptedSst`].
    pub fn open(sst_id: u64, file: FileObj, cache: Arc<BlockCache>) -> Result<Arc<Self>> {
        let file_size = file.size();
        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::corrupted_sst("file too small for footer"));
        }

        let footer = file.read_to_slice(file_size - FOOTER_SIZE as u64, FOOTER_SIZE)?;
        let meta_offset = u32::from_le_bytes(footer[0..4].try_into().unwrap());
        let bloom_offset = u32::from_le_bytes(footer[4..8].try_into().unwrap());
        let min_txid = u64::from_le_bytes(footer[8..16].try_into().unwrap());
        let max_txid = u64::from_le_bytes(footer[16..24].try_into().unwrap());

        let footer_start = file_size - FOOTER_SIZE as u64;
        if meta_offset as u64 > bloom_offset as u64 || bloom_offset as u64 > footer_start {
            return Err(Error::corrupted_sst("footer offsets out of range"));
        }

        let bloom_size = footer_start - bloom_offset as u64;
        let bloom = if bloom_size > 0 {
            let bloom_bytes = file.read_to_slice(bloom_offset as u64, bloom_size as usize)?;
            Some(BloomFilter::decode(&bloom_bytes)?)
        } else {
            None
        };

        let meta_size = (bloom_offset - meta_offset) as usize;
        let meta_bytes = file.read_to_slice(meta_offset as u64, meta_size)?;
        let block_metas = BlockMeta::decode_meta(&meta_bytes)?;

        if block_metas.is_empty() {
            return Err(Error::corrupted_sst("no block metadata"));
        }
        for meta in &block_metas {
            if meta.first_key > meta.last_key {
                return Err(Error::corrupted_sst("block first key exceeds last key"));
            }
            if meta.offset >= meta_offset {
                return Err(Error::corrupted_sst("block offset past meta table"));
            }
        }
        for pair in block_metas.windows(2) {
            if pair[0].offset >= pair[1].offset || pair[0].last_key > pair[1].first_key {
                return Err(Error::corrupted_sst("block metadata out of order"));
            }
        }

        let first_key = block_metas[0].first_key.clone();
        let last_key = block_metas[block_metas.len() - 1].last_key.clone();

        Ok(Arc::new(Self {
            sst_id,
            file,
            block_metas,
            meta_offset,
            first_key,
            last_key,
            bloom,
            cache,
            min_txid,
            max_txid,
        }))
    }

    pub(crate) fn from_build_parts(
        sst_id: u64,
        file: FileObj,
        block_metas: Vec<BlockMeta>,
        meta_offset: u32,
        bloom: Option<BloomFilter>,
        cache: Arc<BlockCache>,
        min_txid: u64,
        max_txid: u64,
    ) -> Arc<Self> {
        let first_key = block_metas[0].first_key.clone();
        let last_key = block_metas[block_metas.len() - 1].last_key.clone();
        Arc::new(Self {
            sst_id,
            file,
            block_metas,
            meta_offset,
            first_key,
            last_key,
            bloom,
            cache,
            min_txid,
            max_txid,
        })
    }

    /// Read one data block, consulting the cache first.
    pub fn read_block(&self, block_idx: usize) -> Result<Arc<Block>> {
        if block_idx >= self.block_metas.len() {
            return Err(Error::invalid_argument(format!(
                "block index {} out of range ({} blocks)",
                block_idx,
                self.block_metas.len()
            )));
        }

        if let Some(block) = self.cache.get(self.sst_id, block_idx) {
            return Ok(block);
        }

        let meta = &self.block_metas[block_idx];
        let end = if block_idx + 1 == self.block_metas.len() {
            self.meta_offset
        } else {
            self.block_metas[block_idx + 1].offset
        };
        let block_size = (end - meta.offset) as usize;

        let block_data = self.file.read_to_slice(meta.offset as u64, block_size)?;
        let block = match Block::decode(&block_data, true) {
            Ok(block) => Arc::new(block),
            Err(e) => {
                log::warn!("sst {} block {} failed to decode: {}", self.sst_id, block_idx, e);
                return Err(e);
            }
        };

        self.cache.put(self.sst_id, block_idx, Arc::clone(&block));
        Ok(block)
    }

    /// Index of the block whose key range contains `key`.
    ///
    /// In point mode the Bloom filter short-circuits keys that are
    /// definitely absent; prefix probes skip the filter (a prefix is not
    /// a stored key).
    pub fn find_block_idx(&self, key: &[u8], is_prefix: bool) -> Option<usize> {
        if !is_prefix {
            if let Some(bloom) = &self.bloom {
                if !bloom.may_contain(key) {
                    return None;
                }
            }
        }

        let mut left = 0;
        let mut right = self.block_metas.len();
        while left < right {
            let mid = left + (right - left) / 2;
            let meta = &self.block_metas[mid];
            if key < meta.first_key.as_ref() {
                right = mid;
            } else if key > meta.last_key.as_ref() {
                left = mid + 1;
            } else {
                return Some(mid);
            }
        }
        None
    }

    /// Check whether any version of `key` is stored in this SST.
    pub fn key_exists(&self, key: &[u8]) -> Result<bool> {
        if key < self.first_key.as_ref() || key > self.last_key.as_ref() {
            return Ok(false);
        }
        let Some(block_idx) = self.find_block_idx(key, false) else {
            return Ok(false);
        };
        let block = self.read_block(block_idx)?;
        Ok(block.key_exists(key))
    }

    /// Resolve the newest visible version of `key` at `read_txid`
    /// (0 means unfiltered). Tombstones resolve to `None`.
    pub fn get(&self, key: &[u8], read_txid: u64) -> Result<Option<(Bytes, u64)>> {
        if key < self.first_key.as_ref() || key > self.last_key.as_ref() {
            return Ok(None);
        }
        let Some(block_idx) = self.find_block_idx(key, false) else {
            return Ok(None);
        };
        let block = self.read_block(block_idx)?;
        let Some(mut idx) = block.find_entry_idx(key) else {
            return Ok(None);
        };

        // Versions of one key are adjacent, newest first.
        while idx < block.num_entries() && block.key_slice(idx) == key {
            let txid = block.txid_at(idx);
            if read_txid == 0 || txid <= read_txid {
                let (_, value, txid) = block.entry_at(idx);
                if value.is_empty() {
                    return Ok(None);
                }
                return Ok(Some((value, txid)));
            }
            idx += 1;
        }
        Ok(None)
    }

    /// All entries whose key starts with `prefix`, visible at
    /// `read_txid`, in key order across every overlapping block.
    pub fn get_prefix_range(
        &self,
        prefix: &[u8],
        read_txid: u64,
    ) -> Result<Vec<(Bytes, Bytes, u64)>> {
        let mut result = Vec::new();
        if prefix > self.last_key.as_ref()
            || (prefix < self.first_key.as_ref() && !self.first_key.starts_with(prefix))
        {
            return Ok(result);
        }

        for block_idx in 0..self.block_metas.len() {
            let meta = &self.block_metas[block_idx];
            if meta.last_key.as_ref() < prefix {
                continue;
            }
            // A first key above the prefix that does not carry it means
            // every later key is past the prefix run.
            if meta.first_key.as_ref() > prefix && !meta.first_key.starts_with(prefix) {
                break;
            }
            let block = self.read_block(block_idx)?;
            result.extend(block.prefix_range(prefix, read_txid));
        }
        Ok(result)
    }

    /// Cursor at the first visible entry of the SST.
    pub fn begin(self: &Arc<Self>, txid: u64) -> SstIterator {
        SstIterator::new_begin(Arc::clone(self), txid)
    }

    /// The distinguished end cursor.
    pub fn end(self: &Arc<Self>) -> SstIterator {
        SstIterator::new_end(Arc::clone(self))
    }

    /// Cursor positioned at the lower bound for `key` (or for the first
    /// key carrying it, in prefix mode) under `txid`.
    pub fn get_iterator(self: &Arc<Self>, key: &[u8], txid: u64, is_prefix: bool) -> SstIterator {
        if is_prefix {
            if (key < self.first_key.as_ref() && !self.first_key.starts_with(key))
                || key > self.last_key.as_ref()
            {
                return self.end();
            }
        } else {
            if key < self.first_key.as_ref() || key > self.last_key.as_ref() {
                return self.end();
            }
            if let Some(bloom) = &self.bloom {
                if !bloom.may_contain(key) {
                    return self.end();
                }
            }
        }
        let mut iter = self.end();
        iter.seek(key);
        iter
    }

    /// Number of data blocks.
    pub fn num_blocks(&self) -> usize {
        self.block_metas.len()
    }

    /// Size of the backing file in bytes.
    pub fn sst_size(&self) -> u64 {
        self.file.size()
    }

    /// Id of this SST.
    pub fn sst_id(&self) -> u64 {
        self.sst_id
    }

    /// Smallest key stored in the SST.
    pub fn first_key(&self) -> &Bytes {
        &self.first_key
    }

    /// Largest key stored in the SST.
    pub fn last_key(&self) -> &Bytes {
        &self.last_key
    }

    /// The (min, max) transaction-id range written into the footer.
    pub fn txid_range(&self) -> (u64, u64) {
        (self.min_txid, self.max_txid)
    }

    /// Drop the SST's cached blocks and unlink its file.
    pub fn del_sst(&self) -> Result<()> {
        self.cache.evict_sst(self.sst_id);
        self.file.del_file()
    }
}

/// Block-spanning forward cursor over one SST.
///
/// Advancing transparently crosses block boundaries. A corrupt block
/// encountered mid-iteration moves the cursor to the end state and
/// stores the error for [`SstIterator::take_error`].
pub struct SstIterator {
    sst: Arc<Sstable>,
    block_idx: usize,
    block_iter: Option<BlockIterator>,
    snapshot: u64,
    error: Option<Error>,
}

impl SstIterator {
    fn new_begin(sst: Arc<Sstable>, snapshot: u64) -> Self {
        let mut iter =
            Self { sst, block_idx: 0, block_iter: None, snapshot, error: None };
        iter.load_block(0);
        iter.skip_exhausted_blocks();
        iter
    }

    fn new_end(sst: Arc<Sstable>) -> Self {
        let block_idx = sst.num_blocks();
        Self { sst, block_idx, block_iter: None, snapshot: 0, error: None }
    }

    fn set_end(&mut self) {
        self.block_idx = self.sst.num_blocks();
        self.block_iter = None;
    }

    fn load_block(&mut self, block_idx: usize) {
        if block_idx >= self.sst.num_blocks() {
            self.set_end();
            return;
        }
        match self.sst.read_block(block_idx) {
            Ok(block) => {
                self.block_idx = block_idx;
                self.block_iter = Some(block.iter(self.snapshot));
            }
            Err(e) => {
                self.error = Some(e);
                self.set_end();
            }
        }
    }

    /// Move past blocks whose every entry is invisible at the snapshot.
    fn skip_exhausted_blocks(&mut self) {
        while let Some(iter) = &self.block_iter {
            if iter.valid() {
                return;
            }
            let next = self.block_idx + 1;
            self.load_block(next);
        }
    }

    /// Position at the lower bound for `key` under the snapshot.
    pub fn seek(&mut self, key: &[u8]) {
        // Lower bound over blocks: the first block that can still hold
        // `key` is the first whose last key is not below it.
        let idx = self
            .sst
            .block_metas
            .partition_point(|meta| meta.last_key.as_ref() < key);
        if idx >= self.sst.num_blocks() {
            self.set_end();
            return;
        }
        match self.sst.read_block(idx) {
            Ok(block) => {
                self.block_idx = idx;
                self.block_iter = Some(block.iter_from(key, self.snapshot));
                self.skip_exhausted_blocks();
            }
            Err(e) => {
                self.error = Some(e);
                self.set_end();
            }
        }
    }

    /// Returns true when the cursor is in the end state.
    pub fn is_end(&self) -> bool {
        self.block_iter.is_none()
    }

    /// Owned (key, value) pair of the current entry.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub fn entry(&self) -> (Bytes, Bytes) {
        (Bytes::copy_from_slice(self.key()), Bytes::copy_from_slice(self.value()))
    }

    /// Owned (key, value, txid) triple of the current entry.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub fn entry_with_txid(&self) -> (Bytes, Bytes, u64) {
        let (key, value) = self.entry();
        (key, value, self.txid())
    }

    /// Index of the block the cursor is positioned in.
    pub fn block_idx(&self) -> usize {
        self.block_idx
    }

    /// Takes the error that moved this iterator to the end state, if any.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Iterator pair bounding the region a monotone predicate accepts.
    ///
    /// `predicate` must be monotone over the key order: negative means
    /// the key is below the region, zero inside it, positive above it.
    /// Returns `(begin, end)` where `begin` sits on the first in-region
    /// entry and `end` on the first entry past it.
    pub fn range_by<F>(sst: &Arc<Sstable>, txid: u64, predicate: F) -> (SstIterator, SstIterator)
    where
        F: Fn(&[u8]) -> Ordering,
    {
        let mut begin = sst.begin(txid);
        while begin.valid() && predicate(begin.key()) == Ordering::Less {
            begin.advance();
        }
        if begin.valid() && predicate(begin.key()) == Ordering::Greater {
            // The region is empty; both bounds collapse to this position.
            let end = begin.clone();
            return (end.clone(), end);
        }

        let mut end = begin.clone();
        while end.valid() && predicate(end.key()) == Ordering::Equal {
            end.advance();
        }
        (begin, end)
    }
}

impl Clone for SstIterator {
    fn clone(&self) -> Self {
        Self {
            sst: Arc::clone(&self.sst),
            block_idx: self.block_idx,
            block_iter: self.block_iter.clone(),
            snapshot: self.snapshot,
            error: None,
        }
    }
}

impl StorageIterator for SstIterator {
    fn valid(&self) -> bool {
        self.block_iter.as_ref().map(|i| i.valid()).unwrap_or(false)
    }

    fn advance(&mut self) {
        let Some(iter) = &mut self.block_iter else {
            return;
        };
        iter.advance();
        self.skip_exhausted_blocks();
    }

    fn key(&self) -> &[u8] {
        self.block_iter.as_ref().expect("Iterator not valid").key()
    }

    fn value(&self) -> &[u8] {
        self.block_iter.as_ref().expect("Iterator not valid").value()
    }

    fn txid(&self) -> u64 {
        self.block_iter.as_ref().expect("Iterator not valid").txid()
    }

    fn snapshot_txid(&self) -> u64 {
        self.snapshot
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::Sst
    }
}

impl PartialEq for SstIterator {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.sst, &other.sst)
            && self.block_idx == other.block_idx
            && match (&self.block_iter, &other.block_iter) {
                (Some(a), Some(b)) => a == b,
                (None, None) => true,
                _ => false,
            }
    }
}
