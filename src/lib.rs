//! # SableKv - LSM-Tree Storage Engine Core
//!
//! SableKv implements the data-structural core of a log-structured
//! merge-tree key-value store: the in-memory write path and the
//! immutable on-disk sorted-string tables (SSTs).
//!
//! ## Architecture
//!
//! - **Skiplist**: multi-version ordered map; several timestamped
//!   versions of one key coexist (MVCC)
//! - **MemTable**: one mutable skiplist plus a FIFO of frozen ones,
//!   coordinating writes, snapshot reads and flush handoff
//! - **SST**: immutable sorted file of fixed-capacity data blocks with
//!   a block index, Bloom filter and per-file transaction-id range
//! - **Block Cache**: shared LRU over decoded data blocks
//! - **Iterators**: uniform forward cursors over skiplists, blocks,
//!   SSTs, and the merged memtable view
//!
//! Compaction scheduling, the write-ahead log, and the public database
//! handle live above this crate and consume these primitives.
//!
//! ## Example Usage
//!
//! ```rust
//! use sablekv::memtable::MemTable;
//!
//! let memtable = MemTable::new();
//!
//! // Writes carry an explicit transaction id.
//! memtable.put(b"key1", b"value1", 100);
//! memtable.put(b"key1", b"value2", 200);
//! memtable.remove(b"key1", 300);
//!
//! // Reads resolve against a snapshot.
//! assert!(memtable.get(b"key1", 150).is_some());
//! assert!(memtable.get(b"key1", 400).is_none()); // deleted
//! ```
//!
//! Flushing a frozen skiplist into an SST:
//!
//! ```rust,no_run
//! use sablekv::cache::BlockCache;
//! use sablekv::config::BLOCK_SIZE;
//! use sablekv::iterator::StorageIterator;
//! use sablekv::memtable::MemTable;
//! use sablekv::sstable::SstBuilder;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), sablekv::Error> {
//! let memtable = MemTable::new();
//! memtable.put(b"key", b"value", 1);
//!
//! let table = memtable.flush();
//! let mut builder = SstBuilder::new(BLOCK_SIZE, true);
//! let mut iter = table.iter();
//! while iter.valid() {
//!     builder.add(iter.key(), iter.value(), iter.txid())?;
//!     iter.advance();
//! }
//! let cache = Arc::new(BlockCache::new(1024));
//! let sst = builder.build(cache, "000001.sst", 1)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod config;
pub mod error;
pub mod file;
pub mod filter;
pub mod iterator;
pub mod memtable;
pub mod skiplist;
pub mod sstable;

pub use config::Options;
pub use error::{Error, Result};
