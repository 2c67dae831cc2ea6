//! SST builder implementation.
//!
//! Streams sorted (key, value, txid) entries into fixed-capacity blocks
//! and emits the complete file in one atomic write.

use crate::cache::BlockCache;
use crate::config::{BLOOM_ERROR_RATE, BLOOM_EXPECTED_SIZE};
use crate::error::{Error, Result};
use crate::file::FileObj;
use crate::filter::{BloomFilter, Filter};
use crate::sstable::block::Block;
use crate::sstable::meta::BlockMeta;
use crate::sstable::reader::Sstable;
use crate::sstable::FOOTER_SIZE;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

/// SstBuilder builds one SST file from a key-ordered entry stream.
///
/// Entries must arrive grouped by key in ascending order, versions of
/// one key in the order the skiplist dumps them. When a new entry
/// continues the key of the previous one the block accepts it past its
/// capacity, keeping the versions of one key in one block when feasible
/// (a pathological number of versions still splits).
///
/// Usage:
/// ```no_run
/// use sablekv::sstable::SstBuilder;
/// use sablekv::cache::BlockCache;
/// use std::sync::Arc;
///
/// let cache = Arc::new(BlockCache::new(1024));
/// let mut builder = SstBuilder::new(4096, true);
/// builder.add(b"key1", b"value1", 1).unwrap();
/// builder.add(b"key2", b"value2", 2).unwrap();
/// let sst = builder.build(cache, "table.sst", 1).unwrap();
/// ```
pub struct SstBuilder {
    block: Block,
    block_size: usize,
    first_key: Bytes,
    last_key: Bytes,
    block_metas: Vec<BlockMeta>,
    data: Vec<u8>,
    bloom: Option<BloomFilter>,
    num_entries: u64,
    min_txid: u64,
    max_txid: u64,
}

impl SstBuilder {
    /// Create a builder producing blocks of `block_size` bytes, with an
    /// optional Bloom filter over the keys.
    pub fn new(block_size: usize, with_bloom: bool) -> Self {
        let bloom =
            with_bloom.then(|| BloomFilter::new(BLOOM_EXPECTED_SIZE, BLOOM_ERROR_RATE));
        Self::with_bloom(block_size, bloom)
    }

    /// Create a builder configured from `options`.
    pub fn with_options(options: &crate::Options) -> Self {
        let bloom = options
            .use_bloom_filter
            .then(|| BloomFilter::new(options.bloom_expected_keys, options.bloom_error_rate));
        Self::with_bloom(options.block_size, bloom)
    }

    fn with_bloom(block_size: usize, bloom: Option<BloomFilter>) -> Self {
        Self {
            block: Block::new(block_size),
            block_size,
            first_key: Bytes::new(),
            last_key: Bytes::new(),
            block_metas: Vec::new(),
            data: Vec::new(),
            bloom,
            num_entries: 0,
            min_txid: u64::MAX,
            max_txid: 0,
        }
    }

    /// Append an entry.
    ///
    /// Fails with [`Error::EntryTooLarge`] when the entry cannot fit
    /// even a fresh block.
    pub fn add(&mut self, key: &[u8], value: &[u8], txid: u64) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_argument("key cannot be empty"));
        }

        if self.first_key.is_empty() {
            self.first_key = Bytes::copy_from_slice(key);
        }

        if let Some(bloom) = &mut self.bloom {
            bloom.add(key);
        }

        self.min_txid = self.min_txid.min(txid);
        self.max_txid = self.max_txid.max(txid);

        // Another version of the key we just wrote goes into the same
        // block even when full, so one key's versions stay together.
        let force_write = key == self.last_key.as_ref();

        if self.block.add_entry(key, value, txid, force_write) {
            self.last_key = Bytes::copy_from_slice(key);
            self.num_entries += 1;
            return Ok(());
        }

        self.finish_block();

        if !self.block.add_entry(key, value, txid, false) {
            return Err(Error::EntryTooLarge {
                size: key.len() + value.len() + 3 * 2 + 8,
                capacity: self.block_size,
            });
        }

        self.first_key = Bytes::copy_from_slice(key);
        self.last_key = Bytes::copy_from_slice(key);
        self.num_entries += 1;
        Ok(())
    }

    /// Encode the pending block into the output buffer and record its
    /// metadata. No-op when the block is empty.
    fn finish_block(&mut self) {
        if self.block.is_empty() {
            return;
        }

        let old_block = std::mem::replace(&mut self.block, Block::new(self.block_size));
        let encoded = old_block.encode(true);

        let offset = self.data.len() as u32;
        self.data.extend_from_slice(&encoded);

        self.block_metas.push(BlockMeta::new(
            offset,
            std::mem::take(&mut self.first_key),
            std::mem::take(&mut self.last_key),
        ));
    }

    /// Bytes of completed blocks buffered so far.
    ///
    /// Callers watch this to cut SSTs near their target size.
    pub fn estimated_size(&self) -> usize {
        self.data.len()
    }

    /// Number of entries added.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Returns true when nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Finish the file and write it atomically at `path`.
    ///
    /// Fails with [`Error::EmptySst`] when no entry was ever added. On
    /// success the returned [`Sstable`] reuses the metadata already in
    /// memory; the file is not read back.
    pub fn build<P: AsRef<Path>>(
        mut self,
        cache: Arc<BlockCache>,
        path: P,
        sst_id: u64,
    ) -> Result<Arc<Sstable>> {
        self.finish_block();

        if self.block_metas.is_empty() {
            return Err(Error::EmptySst);
        }

        let meta_offset = self.data.len() as u32;
        let meta_block = BlockMeta::encode_meta(&self.block_metas);

        let mut file_content = self.data;
        file_content.extend_from_slice(&meta_block);

        let bloom_offset = file_content.len() as u32;
        if let Some(bloom) = &self.bloom {
            file_content.extend_from_slice(&bloom.encode());
        }

        file_content.reserve(FOOTER_SIZE);
        file_content.extend_from_slice(&meta_offset.to_le_bytes());
        file_content.extend_from_slice(&bloom_offset.to_le_bytes());
        file_content.extend_from_slice(&self.min_txid.to_le_bytes());
        file_content.extend_from_slice(&self.max_txid.to_le_bytes());

        let file = FileObj::create_and_write(path, &file_content)?;

        Ok(Sstable::from_build_parts(
            sst_id,
            file,
            self.block_metas,
            meta_offset,
            self.bloom,
            cache,
            self.min_txid,
            self.max_txid,
        ))
    }
}
