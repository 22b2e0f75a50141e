//! Shared test utilities: an instrumented device wrapper and the upsert /
//! read-back helpers the recovery round-trip tests drive the store with.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use cinderkv::address::Address;
use cinderkv::allocator::HybridLog;
use cinderkv::device::{StorageDevice, SyncStorageDevice};
use cinderkv::index::{HashBucketEntry, KeyHash, MemHashIndex};
use cinderkv::record::{self, RecordInfo};

/// Counts read/write operations passing through an inner device.
pub struct CountingDevice<D> {
    inner: D,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<D: SyncStorageDevice> CountingDevice<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }
}

impl<D: SyncStorageDevice> SyncStorageDevice for CountingDevice<D> {
    fn read_sync(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_sync(offset, buf)
    }

    fn write_sync(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_sync(offset, buf)
    }

    fn flush_sync(&self) -> io::Result<()> {
        self.inner.flush_sync()
    }

    fn truncate_sync(&self, size: u64) -> io::Result<()> {
        self.inner.truncate_sync(size)
    }

    fn size_sync(&self) -> io::Result<u64> {
        self.inner.size_sync()
    }
}

/// Upsert the way the live store would: thread the new record onto the
/// bucket's existing chain, then point the bucket at it.
pub fn upsert<D: StorageDevice>(
    index: &MemHashIndex,
    hlog: &HybridLog<D>,
    key: &[u8],
    value: &[u8],
    version: u16,
) -> Address {
    let hash = KeyHash::from_key(key);
    let slot = index.find_or_create_tag(hash, hlog.begin_address());
    let previous = slot.entry.address();

    let address = hlog
        .append(key, value, previous, version, false)
        .expect("append");
    index.install(&slot, HashBucketEntry::new(address, hash.tag()));
    address
}

/// Read a key back through the index, walking the record chain: resident
/// pages are served from the ring, evicted ones from the device.
pub fn read_value<D>(index: &MemHashIndex, hlog: &HybridLog<D>, key: &[u8]) -> Option<Vec<u8>>
where
    D: StorageDevice + SyncStorageDevice,
{
    let hash = KeyHash::from_key(key);
    let slot = index.find_tag(hash)?;
    let mut address = slot.entry.address();

    while address.is_valid() {
        let page = hlog.page_of(address);
        let offset = hlog.offset_in_page(address);

        let (header, record_key, record_value) = if address >= hlog.head_address() {
            hlog.ring().with_frame(page, |frame| {
                (
                    record::header_at(frame, offset),
                    record::key_at(frame, offset).to_vec(),
                    record::value_at(frame, offset).to_vec(),
                )
            })
        } else {
            let mut buf = vec![0u8; hlog.page_size()];
            hlog.device()
                .read_sync(page * hlog.page_size() as u64, &mut buf)
                .ok()?;
            (
                record::header_at(&buf, offset),
                record::key_at(&buf, offset).to_vec(),
                record::value_at(&buf, offset).to_vec(),
            )
        };

        let info = RecordInfo::from_control(header);
        if !info.is_invalid() && record_key == key {
            return if info.is_tombstone() {
                None
            } else {
                Some(record_value)
            };
        }
        address = info.previous_address();
    }

    None
}

/// Read a record header straight off the main log device.
pub fn header_on_disk<D>(hlog: &HybridLog<D>, address: Address) -> RecordInfo
where
    D: StorageDevice + SyncStorageDevice,
{
    let page = hlog.page_of(address);
    let offset = hlog.offset_in_page(address);
    let mut buf = vec![0u8; hlog.page_size()];
    hlog.device()
        .read_sync(page * hlog.page_size() as u64, &mut buf)
        .expect("read page");
    RecordInfo::from_control(record::header_at(&buf, offset))
}

/// The two-field value the round-trip scenarios store for key `k`.
pub fn value_for(k: u64) -> Vec<u8> {
    let mut v = Vec::with_capacity(16);
    v.extend_from_slice(&k.to_le_bytes());
    v.extend_from_slice(&(k + 1).to_le_bytes());
    v
}

pub fn key_for(k: u64) -> Vec<u8> {
    format!("key-{k:05}").into_bytes()
}
