//! Logical addresses into the hybrid log
//!
//! This module provides the `Address` type used to identify positions in the
//! append-only logical log. An address is a 48-bit offset; the split into
//! (page, offset-in-page) depends on the configured page size and lives on the
//! hybrid log, not here. The remaining 16 bits of the containing word are
//! reserved for use by the hash table.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// A logical address into the append-only log.
///
/// Address 0 is the null/invalid address: an all-zero hash bucket word and an
/// all-zero record header both decode to it, so the log writer never places a
/// record there (appending starts at [`Address::FIRST_VALID`]).
#[repr(transparent)]
#[derive(Clone, Copy, Default)]
pub struct Address(u64);

impl Address {
    /// The null address. Doubles as "no previous version" in record headers
    /// and "empty slot" in bucket words.
    pub const INVALID: Self = Self(0);

    /// First address the log writer will hand out (one cache line in, so that
    /// address 0 stays unoccupied).
    pub const FIRST_VALID: Self = Self(64);

    /// Total number of address bits used.
    pub const ADDRESS_BITS: u32 = 48;

    /// Maximum valid address value.
    pub const MAX_ADDRESS: u64 = (1 << Self::ADDRESS_BITS) - 1;

    /// Create an address from a raw control value.
    #[inline]
    pub const fn from_control(control: u64) -> Self {
        Self(control & Self::MAX_ADDRESS)
    }

    /// Get the raw control value.
    #[inline]
    pub const fn control(&self) -> u64 {
        self.0
    }

    /// Check if this is the null address.
    #[inline]
    pub const fn is_invalid(&self) -> bool {
        self.0 == Self::INVALID.0
    }

    /// Check if this is a valid (non-null) address.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        !self.is_invalid()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.0).finish()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for Address {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Address {}

impl PartialOrd for Address {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add<u64> for Address {
    type Output = Self;

    #[inline]
    fn add(self, delta: u64) -> Self::Output {
        debug_assert!(self.0 + delta <= Self::MAX_ADDRESS);
        Self(self.0 + delta)
    }
}

impl AddAssign<u64> for Address {
    #[inline]
    fn add_assign(&mut self, delta: u64) {
        debug_assert!(self.0 + delta <= Self::MAX_ADDRESS);
        self.0 += delta;
    }
}

impl Sub for Address {
    type Output = u64;

    #[inline]
    fn sub(self, other: Self) -> Self::Output {
        self.0 - other.0
    }
}

impl From<u64> for Address {
    #[inline]
    fn from(control: u64) -> Self {
        Self::from_control(control)
    }
}

impl From<Address> for u64 {
    #[inline]
    fn from(addr: Address) -> Self {
        addr.0
    }
}

/// Atomic version of [`Address`] for thread-safe watermarks.
#[repr(transparent)]
pub struct AtomicAddress {
    control: AtomicU64,
}

impl AtomicAddress {
    /// Create a new atomic address.
    #[inline]
    pub const fn new(address: Address) -> Self {
        Self {
            control: AtomicU64::new(address.0),
        }
    }

    /// Load the address atomically.
    #[inline]
    pub fn load(&self, ordering: AtomicOrdering) -> Address {
        Address(self.control.load(ordering))
    }

    /// Store an address atomically.
    #[inline]
    pub fn store(&self, address: Address, ordering: AtomicOrdering) {
        self.control.store(address.0, ordering);
    }

    /// Compare and exchange the address atomically.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: Address,
        new: Address,
        success: AtomicOrdering,
        failure: AtomicOrdering,
    ) -> Result<Address, Address> {
        self.control
            .compare_exchange(current.0, new.0, success, failure)
            .map(Address)
            .map_err(Address)
    }
}

impl Default for AtomicAddress {
    fn default() -> Self {
        Self::new(Address::default())
    }
}

impl fmt::Debug for AtomicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self.load(AtomicOrdering::Relaxed);
        f.debug_struct("AtomicAddress")
            .field("address", &addr)
            .finish()
    }
}

impl Clone for AtomicAddress {
    fn clone(&self) -> Self {
        Self::new(self.load(AtomicOrdering::Relaxed))
    }
}
