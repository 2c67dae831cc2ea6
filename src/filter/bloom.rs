//! Bloom Filter implementation.
//!
//! A space-efficient probabilistic data structure used to test whether an
//! element is a member of a set. False positive matches are possible, but
//! false negatives are not.

use crate::error::{Error, Result};
use crate::filter::Filter;
use std::hash::Hasher;

/// BloomFilter provides probabilistic set membership testing.
///
/// # Example
/// ```
/// use sablekv::filter::{BloomFilter, Filter};
///
/// let mut filter = BloomFilter::new(1000, 0.01); // 1000 keys, 1% false positive rate
/// filter.add(b"key1");
/// filter.add(b"key2");
///
/// assert!(filter.may_contain(b"key1"));
/// assert!(filter.may_contain(b"key2"));
/// // key3 might return true (false positive) or false
/// ```
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Bit array for the bloom filter
    bits: Vec<u8>,
    /// Number of hash functions to use
    num_hashes: u32,
    /// Number of bits in the filter
    num_bits: usize,
}

impl BloomFilter {
    /// Create a new BloomFilter with optimal parameters for the expected
    /// number of keys and false positive rate.
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        if expected_keys == 0 {
            return Self::with_bits_and_hashes(64, 1);
        }

        // m = -n * ln(p) / (ln(2)^2)
        let num_bits = Self::optimal_num_bits(expected_keys, false_positive_rate);

        // k = (m/n) * ln(2)
        let num_hashes = Self::optimal_num_hashes(num_bits, expected_keys);

        Self::with_bits_and_hashes(num_bits, num_hashes)
    }

    fn with_bits_and_hashes(num_bits: usize, num_hashes: u32) -> Self {
        let num_bytes = num_bits.div_ceil(8);

        Self { bits: vec![0u8; num_bytes], num_hashes, num_bits }
    }

    fn optimal_num_bits(expected_keys: usize, false_positive_rate: f64) -> usize {
        let n = expected_keys as f64;
        let p = false_positive_rate.clamp(0.0001, 0.9999);

        let num_bits = (-n * p.ln() / (2.0_f64.ln().powi(2))).ceil() as usize;
        num_bits.max(64)
    }

    fn optimal_num_hashes(num_bits: usize, expected_keys: usize) -> u32 {
        if expected_keys == 0 {
            return 1;
        }

        let k = ((num_bits as f64 / expected_keys as f64) * 2.0_f64.ln()).ceil() as u32;
        k.clamp(1, 30)
    }

    /// Generate the probe positions for a key using double hashing:
    /// hash_i = hash1 + i * hash2 (mod m).
    fn hash_values(&self, key: &[u8]) -> Vec<usize> {
        let hash1 = self.hash_with_seed(key, 0xbc9f1d34);
        let hash2 = self.hash_with_seed(key, 0xd0e89c7b);

        let mut hashes = Vec::with_capacity(self.num_hashes as usize);
        for i in 0..self.num_hashes {
            let hash = hash1.wrapping_add(i.wrapping_mul(hash2));
            hashes.push((hash as usize) % self.num_bits);
        }

        hashes
    }

    fn hash_with_seed(&self, key: &[u8], seed: u32) -> u32 {
        let mut hasher = FnvHasher::new_with_seed(seed);
        hasher.write(key);
        hasher.finish() as u32
    }

    fn set_bit(&mut self, pos: usize) {
        if pos < self.num_bits {
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    fn is_bit_set(&self, pos: usize) -> bool {
        if pos < self.num_bits {
            (self.bits[pos / 8] & (1 << (pos % 8))) != 0
        } else {
            false
        }
    }

    /// Get the size of the filter in bytes.
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// Get the number of hash functions used.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Get the number of bits in the filter.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }
}

impl Filter for BloomFilter {
    /// Check if a key may exist in the set.
    ///
    /// Returns `true` if the key might exist (with possible false positives).
    /// Returns `false` if the key definitely does not exist (no false negatives).
    fn may_contain(&self, key: &[u8]) -> bool {
        let hashes = self.hash_values(key);

        for hash in hashes {
            if !self.is_bit_set(hash) {
                return false; // Definitely not present
            }
        }

        true // Possibly present (or false positive)
    }

    /// Add a key to the filter.
    fn add(&mut self, key: &[u8]) {
        let hashes = self.hash_values(key);

        for hash in hashes {
            self.set_bit(hash);
        }
    }

    /// Encode the filter to bytes for storage.
    ///
    /// Format:
    /// [num_hashes: 4 bytes][num_bits: 8 bytes][bits: variable]
    fn encode(&self) -> Vec<u8> {
        let mut encoded = Vec::new();

        encoded.extend_from_slice(&self.num_hashes.to_le_bytes());
        encoded.extend_from_slice(&(self.num_bits as u64).to_le_bytes());
        encoded.extend_from_slice(&self.bits);

        encoded
    }

    /// Decode a filter from bytes.
    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(Error::corrupted_sst("Bloom filter payload too short"));
        }

        let num_hashes = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let num_bits = u64::from_le_bytes(data[4..12].try_into().unwrap()) as usize;

        let expected_bytes = num_bits.div_ceil(8);
        if data.len() != 12 + expected_bytes {
            return Err(Error::corrupted_sst("Bloom filter size mismatch"));
        }

        let bits = data[12..].to_vec();

        Ok(Self { bits, num_hashes, num_bits })
    }
}

/// Simple FNV-1a hasher for the Bloom filter probes.
struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    fn new_with_seed(seed: u32) -> Self {
        Self { state: Self::FNV_OFFSET_BASIS ^ (seed as u64) }
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::FNV_PRIME);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_filter_basic() {
        let mut filter = BloomFilter::new(100, 0.01);

        filter.add(b"key1");
        filter.add(b"key2");
        filter.add(b"key3");

        assert!(filter.may_contain(b"key1"));
        assert!(filter.may_contain(b"key2"));
        assert!(filter.may_contain(b"key3"));
    }

    #[test]
    fn test_bloom_filter_no_false_negatives() {
        let mut filter = BloomFilter::new(1000, 0.01);

        let keys: Vec<Vec<u8>> = (0..1000).map(|i| format!("key{}", i).into_bytes()).collect();

        for key in &keys {
            filter.add(key);
        }

        for key in &keys {
            assert!(
                filter.may_contain(key),
                "False negative detected for key: {:?}",
                String::from_utf8_lossy(key)
            );
        }
    }

    #[test]
    fn test_bloom_filter_false_positive_rate() {
        let num_keys = 10000;
        let target_fp_rate = 0.01;

        let mut filter = BloomFilter::new(num_keys, target_fp_rate);

        for i in 0..num_keys {
            let key = format!("key{}", i);
            filter.add(key.as_bytes());
        }

        let test_keys = 10000;
        let mut false_positives = 0;

        for i in num_keys..(num_keys + test_keys) {
            let key = format!("key{}", i);
            if filter.may_contain(key.as_bytes()) {
                false_positives += 1;
            }
        }

        // Allow generous headroom over the target rate.
        let observed = false_positives as f64 / test_keys as f64;
        assert!(observed < target_fp_rate * 5.0, "observed fp rate {}", observed);
    }

    #[test]
    fn test_bloom_filter_encode_decode() {
        let mut filter = BloomFilter::new(500, 0.05);
        for i in 0..500 {
            filter.add(format!("key{}", i).as_bytes());
        }

        let encoded = filter.encode();
        let decoded = BloomFilter::decode(&encoded).unwrap();

        assert_eq!(decoded.num_hashes(), filter.num_hashes());
        assert_eq!(decoded.num_bits(), filter.num_bits());
        for i in 0..500 {
            assert!(decoded.may_contain(format!("key{}", i).as_bytes()));
        }
    }

    #[test]
    fn test_bloom_filter_decode_invalid() {
        assert!(BloomFilter::decode(&[1, 2, 3]).is_err());

        let mut truncated = BloomFilter::new(100, 0.1).encode();
        truncated.pop();
        assert!(BloomFilter::decode(&truncated).is_err());
    }
}
