//! In-memory hash index.
//!
//! Maps a key hash to the logical address of the newest record for that key.
//! Lookups resolve a 14-bit tag within a bucket chain; collisions on the
//! bucket spill into an overflow bucket pool. Bucket mutation goes through
//! [`SlotHandle`]s so callers never touch raw bucket memory: the replayer
//! finds (or creates) a tagged slot, then installs a packed 64-bit entry word
//! with a single release store.

use parking_lot::Mutex;
use std::sync::atomic::Ordering;

use crate::address::Address;
use crate::index::{HashBucket, HashBucketEntry, HashBucketOverflowEntry, HashTable, KeyHash};

/// Which bucket a slot lives in: the main table or the overflow pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BucketRef {
    Main(u64),
    Overflow(usize),
}

/// Handle to a bucket slot, returned by the find operations.
///
/// `entry` is the slot's value as observed at find time.
#[derive(Debug, Clone, Copy)]
pub struct SlotHandle {
    bucket: BucketRef,
    slot: usize,
    /// The entry observed when the slot was located.
    pub entry: HashBucketEntry,
}

/// In-memory hash index.
pub struct MemHashIndex {
    table: HashTable,
    overflow: Mutex<Vec<Box<HashBucket>>>,
}

impl MemHashIndex {
    /// Create a new uninitialized index.
    pub fn new() -> Self {
        Self {
            table: HashTable::new(),
            overflow: Mutex::new(Vec::new()),
        }
    }

    /// Allocate the bucket array. `table_size` must be a power of two.
    pub fn initialize(&mut self, table_size: u64) {
        self.overflow.lock().clear();
        self.table.initialize(table_size);
    }

    /// Check whether the index has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.table.is_initialized()
    }

    /// Number of buckets in the main table.
    pub fn table_size(&self) -> u64 {
        self.table.size()
    }

    /// Number of overflow buckets currently allocated.
    pub fn num_overflow_buckets(&self) -> usize {
        self.overflow.lock().len()
    }

    pub(crate) fn table(&self) -> &HashTable {
        &self.table
    }

    fn load_slot(&self, bucket: BucketRef, slot: usize) -> HashBucketEntry {
        match bucket {
            BucketRef::Main(idx) => self.table.bucket_at(idx).entries[slot].load(Ordering::Acquire),
            BucketRef::Overflow(i) => {
                self.overflow.lock()[i].entries[slot].load(Ordering::Acquire)
            }
        }
    }

    fn store_slot(&self, bucket: BucketRef, slot: usize, entry: HashBucketEntry) {
        match bucket {
            BucketRef::Main(idx) => {
                self.table.bucket_at(idx).entries[slot].store(entry, Ordering::Release)
            }
            BucketRef::Overflow(i) => {
                self.overflow.lock()[i].entries[slot].store(entry, Ordering::Release)
            }
        }
    }

    fn cas_slot(
        &self,
        bucket: BucketRef,
        slot: usize,
        expected: HashBucketEntry,
        new: HashBucketEntry,
    ) -> bool {
        let result = match bucket {
            BucketRef::Main(idx) => self.table.bucket_at(idx).entries[slot].compare_exchange(
                expected,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ),
            BucketRef::Overflow(i) => self.overflow.lock()[i].entries[slot].compare_exchange(
                expected,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ),
        };
        result.is_ok()
    }

    fn overflow_link(&self, bucket: BucketRef) -> HashBucketOverflowEntry {
        match bucket {
            BucketRef::Main(idx) => self
                .table
                .bucket_at(idx)
                .overflow_entry
                .load(Ordering::Acquire),
            BucketRef::Overflow(i) => self.overflow.lock()[i].overflow_entry.load(Ordering::Acquire),
        }
    }

    /// Find the slot holding `hash`'s tag, if one exists.
    pub fn find_tag(&self, hash: KeyHash) -> Option<SlotHandle> {
        let tag = hash.tag();
        let mut bucket = BucketRef::Main(self.table.bucket_index(hash));

        loop {
            for slot in 0..HashBucket::NUM_ENTRIES {
                let entry = self.load_slot(bucket, slot);
                if !entry.is_unused() && !entry.is_tentative() && entry.tag() == tag {
                    return Some(SlotHandle {
                        bucket,
                        slot,
                        entry,
                    });
                }
            }

            let link = self.overflow_link(bucket);
            if link.is_unused() {
                return None;
            }
            bucket = BucketRef::Overflow(link.pool_index());
        }
    }

    /// Find the slot holding `hash`'s tag, creating one if necessary.
    ///
    /// A newly created slot carries `Address::INVALID` and the tag; the caller
    /// installs the real address afterwards. Slots whose address has fallen
    /// below `begin_address` are treated as free and reclaimed. Insertion uses
    /// a tentative entry plus a conflict sweep so two racing creators of the
    /// same tag cannot both win.
    pub fn find_or_create_tag(&self, hash: KeyHash, begin_address: Address) -> SlotHandle {
        let tag = hash.tag();
        let head = BucketRef::Main(self.table.bucket_index(hash));

        loop {
            if let Some(found) = self.find_tag(hash) {
                return found;
            }

            let (bucket, slot, expected) = match self.find_free_slot(head, begin_address) {
                Some(free) => free,
                None => {
                    let (bucket, slot) = self.append_overflow_bucket(head);
                    (bucket, slot, HashBucketEntry::INVALID)
                }
            };

            let tentative = HashBucketEntry::with_flags(Address::INVALID, tag, false, true);
            if !self.cas_slot(bucket, slot, expected, tentative) {
                continue;
            }

            if self.has_conflicting_entry(tag, head, bucket, slot) {
                // Back off; someone else owns this tag now.
                self.store_slot(bucket, slot, HashBucketEntry::INVALID);
                continue;
            }

            let entry = HashBucketEntry::new(Address::INVALID, tag);
            self.store_slot(bucket, slot, entry);
            return SlotHandle {
                bucket,
                slot,
                entry,
            };
        }
    }

    /// Install `entry` into the slot behind `handle`: one 64-bit release
    /// store. The last install for a given slot wins.
    pub fn install(&self, handle: &SlotHandle, entry: HashBucketEntry) {
        self.store_slot(handle.bucket, handle.slot, entry);
    }

    /// Re-read the current value of the slot behind `handle`.
    pub fn entry_at(&self, handle: &SlotHandle) -> HashBucketEntry {
        self.load_slot(handle.bucket, handle.slot)
    }

    fn find_free_slot(
        &self,
        head: BucketRef,
        begin_address: Address,
    ) -> Option<(BucketRef, usize, HashBucketEntry)> {
        let mut bucket = head;

        loop {
            for slot in 0..HashBucket::NUM_ENTRIES {
                let entry = self.load_slot(bucket, slot);
                if entry.is_unused() {
                    return Some((bucket, slot, entry));
                }
                // Entries below the log's begin address are dead weight from
                // a truncated log; reclaim them.
                if !entry.is_tentative() && entry.address() < begin_address {
                    return Some((bucket, slot, entry));
                }
            }

            let link = self.overflow_link(bucket);
            if link.is_unused() {
                return None;
            }
            bucket = BucketRef::Overflow(link.pool_index());
        }
    }

    fn has_conflicting_entry(
        &self,
        tag: u16,
        head: BucketRef,
        our_bucket: BucketRef,
        our_slot: usize,
    ) -> bool {
        let mut bucket = head;

        loop {
            for slot in 0..HashBucket::NUM_ENTRIES {
                if bucket == our_bucket && slot == our_slot {
                    continue;
                }
                let entry = self.load_slot(bucket, slot);
                if !entry.is_unused() && !entry.is_tentative() && entry.tag() == tag {
                    return true;
                }
            }

            let link = self.overflow_link(bucket);
            if link.is_unused() {
                return false;
            }
            bucket = BucketRef::Overflow(link.pool_index());
        }
    }

    fn append_overflow_bucket(&self, head: BucketRef) -> (BucketRef, usize) {
        let mut pool = self.overflow.lock();

        // Walk to the chain tail under the pool lock; appends are serialized
        // by the same lock, so the tail cannot move underneath us.
        let mut bucket = head;
        loop {
            let link = match bucket {
                BucketRef::Main(idx) => self
                    .table
                    .bucket_at(idx)
                    .overflow_entry
                    .load(Ordering::Acquire),
                BucketRef::Overflow(i) => pool[i].overflow_entry.load(Ordering::Acquire),
            };
            if link.is_unused() {
                break;
            }
            bucket = BucketRef::Overflow(link.pool_index());
        }

        pool.push(Box::new(HashBucket::new()));
        let new_index = pool.len() - 1;
        let link = HashBucketOverflowEntry::new(new_index);

        match bucket {
            BucketRef::Main(idx) => self
                .table
                .bucket_at(idx)
                .overflow_entry
                .store(link, Ordering::Release),
            BucketRef::Overflow(i) => pool[i].overflow_entry.store(link, Ordering::Release),
        }

        (BucketRef::Overflow(new_index), 0)
    }

    /// Clear every tentative entry. A fuzzy index checkpoint can capture
    /// mid-insertion slots; recovery sweeps them before replay.
    pub fn clear_tentative_entries(&self) {
        for idx in 0..self.table.size() {
            let bucket = self.table.bucket_at(idx);
            for slot in &bucket.entries {
                if slot.load(Ordering::Acquire).is_tentative() {
                    slot.store(HashBucketEntry::INVALID, Ordering::Release);
                }
            }
        }

        let pool = self.overflow.lock();
        for bucket in pool.iter() {
            for slot in &bucket.entries {
                if slot.load(Ordering::Acquire).is_tentative() {
                    slot.store(HashBucketEntry::INVALID, Ordering::Release);
                }
            }
        }
    }

    /// Count used (non-tentative) entries across the table and overflow pool.
    pub fn num_entries(&self) -> u64 {
        let mut count = 0u64;

        for idx in 0..self.table.size() {
            let bucket = self.table.bucket_at(idx);
            for slot in &bucket.entries {
                let entry = slot.load(Ordering::Relaxed);
                if !entry.is_unused() && !entry.is_tentative() {
                    count += 1;
                }
            }
        }

        let pool = self.overflow.lock();
        for bucket in pool.iter() {
            for slot in &bucket.entries {
                let entry = slot.load(Ordering::Relaxed);
                if !entry.is_unused() && !entry.is_tentative() {
                    count += 1;
                }
            }
        }

        count
    }

    pub(crate) fn with_overflow_pool<R>(&self, f: impl FnOnce(&mut Vec<Box<HashBucket>>) -> R) -> R {
        f(&mut self.overflow.lock())
    }
}

impl Default for MemHashIndex {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: all bucket access goes through atomics; the overflow pool is behind
// a mutex.
unsafe impl Send for MemHashIndex {}
unsafe impl Sync for MemHashIndex {}

mod checkpoint;

pub use checkpoint::IndexCheckpointStats;
