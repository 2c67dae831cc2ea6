//! SST (Sorted String Table) implementation.
//!
//! An SST is an immutable, sorted file holding multi-version key-value
//! entries. It is produced in one shot by [`SstBuilder`] from a frozen
//! skiplist and read through the shared block cache.
//!
//! ## File Format
//!
//! ```text
//! [Data Block 0]
//! [Data Block 1]
//! ...
//! [Data Block N-1]
//! [Block Meta Table]   // per block: offset, first key, last key
//! [Bloom Filter]       // optional, self-describing payload
//! [Footer: 24B]        // meta_offset, bloom_offset, min_txid, max_txid
//! ```
//!
//! ## Block Format
//!
//! Each block holds concatenated entries
//! (`key_len | key | value_len | value | txid`), a u16 offset table, the
//! entry count, and a CRC32 of everything before it. All integers are
//! little-endian.

pub mod block;
pub mod builder;
pub mod meta;
pub mod reader;

pub use block::{Block, BlockIterator};
pub use builder::SstBuilder;
pub use meta::BlockMeta;
pub use reader::{SstIterator, Sstable};

/// Footer size in bytes: two u32 offsets and two u64 transaction ids.
pub const FOOTER_SIZE: usize = 24;
