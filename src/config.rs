//! Configuration options for the sablekv storage engine.

/// Size threshold at which the current skiplist is frozen (2 MiB).
pub const MAX_MEMTABLE_SIZE: usize = 2 * 1024 * 1024;

/// Target size of a single SST file (4 MiB).
pub const MAX_SSTABLE_SIZE: usize = 4 * 1024 * 1024;

/// Capacity of a single data block (4 KiB).
pub const BLOCK_SIZE: usize = 4 * 1024;

/// Block cache capacity, counted in blocks.
pub const BLOCK_CACHE_CAPACITY: usize = 1024;

/// Size multiplier between LSM levels.
pub const LSM_LEVEL_RATIO: usize = 4;

/// Maximum skiplist height.
pub const MAX_LEVEL: usize = 16;

/// Probability of promoting a skiplist node one level.
pub const SKIPLIST_P: f64 = 0.25;

/// Expected key count used to size each SST's Bloom filter.
pub const BLOOM_EXPECTED_SIZE: usize = 65536;

/// Target false positive rate for the Bloom filter.
pub const BLOOM_ERROR_RATE: f64 = 0.1;

/// Configuration options for the storage engine.
#[derive(Debug, Clone)]
pub struct Options {
    /// Size threshold for freezing the current skiplist (in bytes).
    /// Default: 2MB
    pub memtable_size: usize,

    /// Target size for SST files (in bytes).
    /// Default: 4MB
    pub sstable_size: usize,

    /// Capacity of a data block (in bytes).
    /// Default: 4KB
    pub block_size: usize,

    /// Block cache capacity (in blocks).
    /// Set to 0 to disable caching.
    /// Default: 1024
    pub block_cache_capacity: usize,

    /// Enable a Bloom filter per SST.
    /// Default: true
    pub use_bloom_filter: bool,

    /// Expected number of keys per SST, used to size the Bloom filter.
    /// Default: 65536
    pub bloom_expected_keys: usize,

    /// Bloom filter false positive rate.
    /// Default: 0.1 (10%)
    pub bloom_error_rate: f64,

    /// Size multiplier between LSM levels (consumed by the compactor).
    /// Default: 4
    pub level_size_ratio: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            memtable_size: MAX_MEMTABLE_SIZE,
            sstable_size: MAX_SSTABLE_SIZE,
            block_size: BLOCK_SIZE,
            block_cache_capacity: BLOCK_CACHE_CAPACITY,
            use_bloom_filter: true,
            bloom_expected_keys: BLOOM_EXPECTED_SIZE,
            bloom_error_rate: BLOOM_ERROR_RATE,
            level_size_ratio: LSM_LEVEL_RATIO,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the memtable freeze threshold.
    pub fn memtable_size(mut self, size: usize) -> Self {
        self.memtable_size = size;
        self
    }

    /// Sets the data block capacity.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the block cache capacity, in blocks.
    pub fn block_cache_capacity(mut self, blocks: usize) -> Self {
        self.block_cache_capacity = blocks;
        self
    }

    /// Enables or disables the per-SST Bloom filter.
    pub fn use_bloom_filter(mut self, value: bool) -> Self {
        self.use_bloom_filter = value;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.memtable_size == 0 {
            return Err(crate::Error::invalid_argument("memtable_size must be > 0"));
        }
        if self.block_size == 0 {
            return Err(crate::Error::invalid_argument("block_size must be > 0"));
        }
        if self.block_size > u16::MAX as usize {
            return Err(crate::Error::invalid_argument(
                "block_size must fit the u16 offset table",
            ));
        }
        if self.bloom_error_rate <= 0.0 || self.bloom_error_rate >= 1.0 {
            return Err(crate::Error::invalid_argument(
                "bloom_error_rate must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.memtable_size, 2 * 1024 * 1024);
        assert_eq!(opts.block_size, 4 * 1024);
        assert!(opts.use_bloom_filter);
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .memtable_size(8 * 1024 * 1024)
            .block_size(8 * 1024)
            .use_bloom_filter(false);

        assert_eq!(opts.memtable_size, 8 * 1024 * 1024);
        assert_eq!(opts.block_size, 8 * 1024);
        assert!(!opts.use_bloom_filter);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.memtable_size = 0;
        assert!(opts.validate().is_err());

        opts.memtable_size = 1024;
        opts.bloom_error_rate = 1.5;
        assert!(opts.validate().is_err());

        opts.bloom_error_rate = 0.1;
        opts.block_size = 100_000;
        assert!(opts.validate().is_err());
    }
}
