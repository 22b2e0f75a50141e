//! Storage device traits.

use std::future::Future;
use std::io;
use std::pin::Pin;

/// Async storage device trait.
///
/// Recovery drives these futures from a dedicated I/O worker thread; see
/// `recovery::page_io`.
pub trait StorageDevice: Send + Sync + 'static {
    /// Read `buf.len()` bytes from `offset` into `buf`.
    fn read(
        &self,
        offset: u64,
        buf: &mut [u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<usize>> + Send + '_>>;

    /// Write `buf` at `offset`.
    fn write(
        &self,
        offset: u64,
        buf: &[u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<usize>> + Send + '_>>;

    /// Flush any buffered writes to stable storage.
    fn flush(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>>;

    /// Truncate the device to the specified size.
    fn truncate(&self, size: u64) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>>;

    /// Get the current size of the device.
    fn size(&self) -> io::Result<u64>;

    /// Get the alignment requirement for I/O operations.
    fn alignment(&self) -> usize {
        512
    }
}

/// Synchronous storage device trait (for simpler implementations).
///
/// Every `SyncStorageDevice` automatically implements [`StorageDevice`] via
/// ready futures.
pub trait SyncStorageDevice: Send + Sync + 'static {
    /// Read data synchronously.
    fn read_sync(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write data synchronously.
    fn write_sync(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Flush synchronously.
    fn flush_sync(&self) -> io::Result<()>;

    /// Truncate synchronously.
    fn truncate_sync(&self, size: u64) -> io::Result<()>;

    /// Get the current size.
    fn size_sync(&self) -> io::Result<u64>;

    /// Get alignment requirement.
    fn alignment(&self) -> usize {
        512
    }
}

impl<T: SyncStorageDevice> StorageDevice for T {
    fn read(
        &self,
        offset: u64,
        buf: &mut [u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<usize>> + Send + '_>> {
        let result = self.read_sync(offset, buf);
        Box::pin(async move { result })
    }

    fn write(
        &self,
        offset: u64,
        buf: &[u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<usize>> + Send + '_>> {
        let result = self.write_sync(offset, buf);
        Box::pin(async move { result })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        let result = self.flush_sync();
        Box::pin(async move { result })
    }

    fn truncate(&self, size: u64) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        let result = self.truncate_sync(size);
        Box::pin(async move { result })
    }

    fn size(&self) -> io::Result<u64> {
        self.size_sync()
    }

    fn alignment(&self) -> usize {
        SyncStorageDevice::alignment(self)
    }
}
