//! Storage device abstraction.
//!
//! Recovery reads log pages, snapshot files and checkpoint artifacts through
//! the [`StorageDevice`] trait. Synchronous backends implement
//! [`SyncStorageDevice`] and get the async surface for free.
//!
//! Available devices:
//!
//! - [`FileDevice`]: a single file
//! - [`SegmentedDevice`]: one logical offset space across fixed-size segments
//! - [`NullDevice`]: discards writes, reads zeros (testing)

mod file_device;
mod null_device;
mod traits;

pub use file_device::{FileDevice, SegmentedDevice};
pub use null_device::NullDevice;
pub use traits::{StorageDevice, SyncStorageDevice};

use std::future::Future;
use std::io;

/// Drive a device future to completion from synchronous code.
///
/// Must not be called from inside an async runtime; checkpoint writers and
/// the recovery I/O worker run on plain threads.
pub(crate) fn run_io<T>(fut: impl Future<Output = io::Result<T>>) -> io::Result<T> {
    let rt = tokio::runtime::Builder::new_current_thread().build()?;
    rt.block_on(fut)
}
