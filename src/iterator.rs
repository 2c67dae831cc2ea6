//! The common cursor interface shared by the engine's iterators.
//!
//! Skiplist, block, SST and memtable cursors all expose the same forward
//! surface so merging layers can treat them uniformly.

/// Identifies the concrete iterator behind a [`StorageIterator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorKind {
    /// Cursor over one skiplist.
    Skiplist,
    /// Cursor over one data block.
    Block,
    /// Block-spanning cursor over one SST file.
    Sst,
    /// Merged cursor over a memtable's skiplists.
    MemTable,
}

/// A forward cursor over (key, value, txid) entries.
///
/// Iterators are single-pass: once `valid()` returns false the cursor is
/// exhausted. Entries invisible under the cursor's snapshot (txid greater
/// than `snapshot_txid`, when the snapshot is non-zero) are never yielded.
pub trait StorageIterator {
    /// Returns true while the cursor is positioned on an entry.
    fn valid(&self) -> bool;

    /// Moves to the next visible entry.
    fn advance(&mut self);

    /// Returns the current key.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    fn key(&self) -> &[u8];

    /// Returns the current value.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    fn value(&self) -> &[u8];

    /// Returns the transaction id of the current entry.
    fn txid(&self) -> u64;

    /// Returns the snapshot this cursor reads at (0 means unfiltered).
    fn snapshot_txid(&self) -> u64;

    /// Returns the kind of the concrete cursor.
    fn kind(&self) -> IteratorKind;
}
