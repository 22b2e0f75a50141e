//! Contiguous bucket array backing the hash index.

use crate::index::{HashBucket, KeyHash};
use crate::utility::is_power_of_two;

/// A contiguous, power-of-two-sized array of hash buckets.
pub struct HashTable {
    buckets: Vec<HashBucket>,
    size: u64,
}

impl HashTable {
    /// Create a new uninitialized table.
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
            size: 0,
        }
    }

    /// Allocate the bucket array. `size` must be a power of two.
    pub fn initialize(&mut self, size: u64) {
        assert!(is_power_of_two(size), "table size must be a power of two");
        assert!(size <= i32::MAX as u64);

        let mut buckets = Vec::with_capacity(size as usize);
        buckets.resize_with(size as usize, HashBucket::new);
        self.buckets = buckets;
        self.size = size;
    }

    /// Check whether the table has been initialized.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.size != 0
    }

    /// Number of buckets.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get the bucket for a hash.
    #[inline]
    pub fn bucket(&self, hash: KeyHash) -> &HashBucket {
        &self.buckets[hash.hash_table_index(self.size)]
    }

    /// Index of the bucket a hash lands in.
    #[inline]
    pub fn bucket_index(&self, hash: KeyHash) -> u64 {
        hash.hash_table_index(self.size) as u64
    }

    /// Get the bucket at a raw index.
    #[inline]
    pub fn bucket_at(&self, idx: u64) -> &HashBucket {
        &self.buckets[idx as usize]
    }
}

impl Default for HashTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize() {
        let mut table = HashTable::new();
        assert!(!table.is_initialized());

        table.initialize(256);
        assert!(table.is_initialized());
        assert_eq!(table.size(), 256);
    }

    #[test]
    #[should_panic]
    fn test_initialize_rejects_non_power_of_two() {
        let mut table = HashTable::new();
        table.initialize(300);
    }

    #[test]
    fn test_bucket_lookup_stays_in_range() {
        let mut table = HashTable::new();
        table.initialize(64);

        for i in 0..1000u64 {
            let hash = KeyHash::new(i.wrapping_mul(0x9e3779b97f4a7c15));
            assert!(table.bucket_index(hash) < 64);
            let _ = table.bucket(hash);
        }
    }
}
