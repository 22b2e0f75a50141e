//! Record format for the hybrid log
//!
//! Every record in the log is a fixed 8-byte header ([`RecordInfo`]) followed
//! by the key and value, 8-byte aligned:
//!
//! ```text
//! +------------------+
//! | RecordInfo (8)   |
//! +------------------+
//! | key_len   (u32)  |
//! | value_len (u32)  |
//! +------------------+
//! | key bytes        |
//! +------------------+
//! | value bytes      |
//! +------------------+
//! | padding to 8     |
//! +------------------+
//! ```
//!
//! An all-zero header is a *null record*: padding left by the log writer at a
//! page tail, 8 bytes wide, with no key or value following it. Records never
//! straddle a page boundary.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::address::Address;
use crate::utility::pad_alignment;

/// Record header, bit-packed into 64 bits:
///
/// - Previous address (48 bits): prior version of the same key, forming a
///   per-key chain through the log toward lower addresses.
/// - Version (14 bits): the store's checkpoint epoch at write time.
/// - Tombstone bit: delete marker.
/// - Invalid bit: the record must be ignored by reads and replay.
#[repr(transparent)]
pub struct RecordInfo {
    control: AtomicU64,
}

impl RecordInfo {
    /// Mask for the previous address (48 bits).
    const PREV_ADDR_MASK: u64 = (1 << 48) - 1;

    /// Shift for the checkpoint version.
    const VERSION_SHIFT: u32 = 48;
    /// Mask for the checkpoint version (14 bits).
    const VERSION_MASK: u64 = (1 << 14) - 1;

    /// Bit position for the tombstone flag.
    const TOMBSTONE_BIT: u64 = 1 << 62;
    /// Bit position for the invalid flag.
    const INVALID_BIT: u64 = 1 << 63;

    /// Create a new record header.
    pub fn new(previous_address: Address, version: u16, tombstone: bool) -> Self {
        let mut control = previous_address.control() & Self::PREV_ADDR_MASK;
        control |= ((version as u64) & Self::VERSION_MASK) << Self::VERSION_SHIFT;
        if tombstone {
            control |= Self::TOMBSTONE_BIT;
        }
        Self {
            control: AtomicU64::new(control),
        }
    }

    /// Create a record header from a raw control value.
    pub fn from_control(control: u64) -> Self {
        Self {
            control: AtomicU64::new(control),
        }
    }

    /// Check if the header is null (all zeros): a padding tombstone, not a
    /// full record.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.control.load(Ordering::Acquire) == 0
    }

    /// Get the previous address in this key's version chain.
    #[inline]
    pub fn previous_address(&self) -> Address {
        Address::from_control(self.control.load(Ordering::Acquire) & Self::PREV_ADDR_MASK)
    }

    /// Get the checkpoint version stamped on the record.
    #[inline]
    pub fn version(&self) -> u16 {
        ((self.control.load(Ordering::Acquire) >> Self::VERSION_SHIFT) & Self::VERSION_MASK) as u16
    }

    /// Check if the record has been invalidated.
    #[inline]
    pub fn is_invalid(&self) -> bool {
        (self.control.load(Ordering::Acquire) & Self::INVALID_BIT) != 0
    }

    /// Set the invalid flag.
    #[inline]
    pub fn set_invalid(&self) {
        self.control.fetch_or(Self::INVALID_BIT, Ordering::AcqRel);
    }

    /// Check if this is a tombstone (delete marker).
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        (self.control.load(Ordering::Acquire) & Self::TOMBSTONE_BIT) != 0
    }

    /// Get the raw control value.
    #[inline]
    pub fn control(&self) -> u64 {
        self.control.load(Ordering::Acquire)
    }
}

impl Clone for RecordInfo {
    fn clone(&self) -> Self {
        Self {
            control: AtomicU64::new(self.control.load(Ordering::Acquire)),
        }
    }
}

impl Default for RecordInfo {
    fn default() -> Self {
        Self {
            control: AtomicU64::new(0),
        }
    }
}

impl fmt::Debug for RecordInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordInfo")
            .field("previous_address", &self.previous_address())
            .field("version", &self.version())
            .field("invalid", &self.is_invalid())
            .field("tombstone", &self.is_tombstone())
            .finish()
    }
}

// RecordInfo must be exactly 8 bytes; the wire format depends on it.
const _: () = assert!(mem::size_of::<RecordInfo>() == 8);

/// Size of the record header in bytes.
pub const HEADER_SIZE: usize = mem::size_of::<RecordInfo>();

/// Alignment of records within a page.
pub const RECORD_ALIGNMENT: usize = 8;

/// Offset of the key bytes from the record start (header + two u32 lengths).
pub const KEY_OFFSET: usize = HEADER_SIZE + 2 * mem::size_of::<u32>();

/// Total aligned size of a record with the given key and value lengths.
#[inline]
pub const fn record_size(key_len: u32, value_len: u32) -> usize {
    pad_alignment(
        KEY_OFFSET + key_len as usize + value_len as usize,
        RECORD_ALIGNMENT,
    )
}

/// Read the raw header word at `offset` within a page frame.
#[inline]
pub fn header_at(frame: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(frame[offset..offset + HEADER_SIZE].try_into().unwrap())
}

/// Overwrite the header word at `offset` within a page frame.
#[inline]
pub fn set_header_at(frame: &mut [u8], offset: usize, control: u64) {
    frame[offset..offset + HEADER_SIZE].copy_from_slice(&control.to_le_bytes());
}

/// Decode the key/value lengths stored after the header.
#[inline]
fn lengths_at(frame: &[u8], offset: usize) -> (u32, u32) {
    let key_len = u32::from_le_bytes(frame[offset + 8..offset + 12].try_into().unwrap());
    let value_len = u32::from_le_bytes(frame[offset + 12..offset + 16].try_into().unwrap());
    (key_len, value_len)
}

/// Decode the total aligned size of the record starting at `offset`.
///
/// Must not be called on a null header; null records are 8 bytes of padding
/// with no length fields behind them.
#[inline]
pub fn record_size_at(frame: &[u8], offset: usize) -> usize {
    let (key_len, value_len) = lengths_at(frame, offset);
    record_size(key_len, value_len)
}

/// Borrow the key bytes of the record starting at `offset`.
#[inline]
pub fn key_at(frame: &[u8], offset: usize) -> &[u8] {
    let (key_len, _) = lengths_at(frame, offset);
    &frame[offset + KEY_OFFSET..offset + KEY_OFFSET + key_len as usize]
}

/// Borrow the value bytes of the record starting at `offset`.
#[inline]
pub fn value_at(frame: &[u8], offset: usize) -> &[u8] {
    let (key_len, value_len) = lengths_at(frame, offset);
    let start = offset + KEY_OFFSET + key_len as usize;
    &frame[start..start + value_len as usize]
}

/// Encode a full record at `offset` within a page frame.
///
/// Returns the aligned size written. The caller guarantees the record fits
/// within the frame (records never straddle a page boundary).
pub fn write_record(
    frame: &mut [u8],
    offset: usize,
    info: &RecordInfo,
    key: &[u8],
    value: &[u8],
) -> usize {
    let size = record_size(key.len() as u32, value.len() as u32);
    debug_assert!(offset + size <= frame.len());

    set_header_at(frame, offset, info.control());
    frame[offset + 8..offset + 12].copy_from_slice(&(key.len() as u32).to_le_bytes());
    frame[offset + 12..offset + 16].copy_from_slice(&(value.len() as u32).to_le_bytes());
    frame[offset + KEY_OFFSET..offset + KEY_OFFSET + key.len()].copy_from_slice(key);
    let value_start = offset + KEY_OFFSET + key.len();
    frame[value_start..value_start + value.len()].copy_from_slice(value);
    // Zero the alignment padding so a scan never sees stale bytes.
    frame[value_start + value.len()..offset + size].fill(0);

    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_info_roundtrip() {
        let prev = Address::from_control(4096);
        let info = RecordInfo::new(prev, 5, false);

        assert_eq!(info.previous_address(), prev);
        assert_eq!(info.version(), 5);
        assert!(!info.is_invalid());
        assert!(!info.is_tombstone());
        assert!(!info.is_null());
    }

    #[test]
    fn test_record_info_flags() {
        let info = RecordInfo::new(Address::INVALID, 3, true);
        assert!(info.is_tombstone());

        assert!(!info.is_invalid());
        info.set_invalid();
        assert!(info.is_invalid());
        // Invalidation must not disturb the rest of the word.
        assert_eq!(info.version(), 3);
        assert!(info.is_tombstone());
    }

    #[test]
    fn test_null_header() {
        let info = RecordInfo::default();
        assert!(info.is_null());
        assert_eq!(info.control(), 0);
    }

    #[test]
    fn test_version_14_bits() {
        let info = RecordInfo::new(Address::INVALID, u16::MAX, false);
        assert_eq!(info.version(), (1 << 14) - 1);
    }

    #[test]
    fn test_record_size_alignment() {
        // 16-byte prefix + 3 + 5 = 24, already aligned.
        assert_eq!(record_size(3, 5), 24);
        // 16 + 4 + 5 = 25 -> 32.
        assert_eq!(record_size(4, 5), 32);
        assert_eq!(record_size(0, 0), 16);
    }

    #[test]
    fn test_write_and_read_record() {
        let mut frame = vec![0u8; 256];
        let info = RecordInfo::new(Address::from_control(100), 2, false);

        let size = write_record(&mut frame, 64, &info, b"key-7", b"value-7");
        assert_eq!(size, record_size(5, 7));

        assert_eq!(header_at(&frame, 64), info.control());
        assert_eq!(record_size_at(&frame, 64), size);
        assert_eq!(key_at(&frame, 64), b"key-7");
        assert_eq!(value_at(&frame, 64), b"value-7");

        let decoded = RecordInfo::from_control(header_at(&frame, 64));
        assert_eq!(decoded.previous_address().control(), 100);
        assert_eq!(decoded.version(), 2);
    }

    #[test]
    fn test_set_header_in_frame() {
        let mut frame = vec![0u8; 64];
        let info = RecordInfo::new(Address::INVALID, 9, false);
        write_record(&mut frame, 0, &info, b"k", b"v");

        info.set_invalid();
        set_header_at(&mut frame, 0, info.control());

        let decoded = RecordInfo::from_control(header_at(&frame, 0));
        assert!(decoded.is_invalid());
        assert_eq!(decoded.version(), 9);
    }
}
