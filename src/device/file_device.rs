//! File-backed storage devices.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::device::SyncStorageDevice;

/// A single file with mutex-protected positioned I/O.
pub struct FileDevice {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileDevice {
    /// Open or create a file at the specified path.
    pub fn open(path: impl AsRef<Path>, create: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Open an existing file read/write, failing if it does not exist.
    pub fn open_existing(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open(path, false)
    }

    /// Get the path to the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SyncStorageDevice for FileDevice {
    fn read_sync(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        // Reads past EOF yield zeros: a log page that was never flushed in
        // full reads back as null-header padding.
        let mut total = 0;
        while total < buf.len() {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                buf[total..].fill(0);
                break;
            }
            total += n;
        }
        Ok(buf.len())
    }

    fn write_sync(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush_sync(&self) -> io::Result<()> {
        self.file.lock().sync_all()
    }

    fn truncate_sync(&self, size: u64) -> io::Result<()> {
        self.file.lock().set_len(size)
    }

    fn size_sync(&self) -> io::Result<u64> {
        self.file.lock().metadata().map(|m| m.len())
    }
}

/// Segmented file device: splits one logical offset space across multiple
/// fixed-size segment files.
pub struct SegmentedDevice {
    base_dir: PathBuf,
    prefix: String,
    segment_size: u64,
    segments: Mutex<Vec<Option<FileDevice>>>,
}

impl SegmentedDevice {
    /// Create a new segmented device under `base_dir`.
    pub fn new(base_dir: impl AsRef<Path>, prefix: &str, segment_size: u64) -> io::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;

        Ok(Self {
            base_dir,
            prefix: prefix.to_string(),
            segment_size,
            segments: Mutex::new(Vec::new()),
        })
    }

    /// Segment size in bytes.
    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    fn segment_path(&self, segment: u64) -> PathBuf {
        self.base_dir.join(format!("{}.{}", self.prefix, segment))
    }

    fn with_segment<R>(
        &self,
        segment: u64,
        f: impl FnOnce(&FileDevice) -> io::Result<R>,
    ) -> io::Result<R> {
        let mut segments = self.segments.lock();

        while segments.len() <= segment as usize {
            segments.push(None);
        }
        if segments[segment as usize].is_none() {
            let file = FileDevice::open(self.segment_path(segment), true)?;
            segments[segment as usize] = Some(file);
        }

        f(segments[segment as usize].as_ref().expect("segment opened"))
    }
}

impl SyncStorageDevice for SegmentedDevice {
    fn read_sync(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let segment = offset / self.segment_size;
        let segment_offset = offset % self.segment_size;
        self.with_segment(segment, |file| file.read_sync(segment_offset, buf))
    }

    fn write_sync(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let segment = offset / self.segment_size;
        let segment_offset = offset % self.segment_size;
        self.with_segment(segment, |file| file.write_sync(segment_offset, buf))
    }

    fn flush_sync(&self) -> io::Result<()> {
        let segments = self.segments.lock();
        for segment in segments.iter().flatten() {
            segment.flush_sync()?;
        }
        Ok(())
    }

    fn truncate_sync(&self, _size: u64) -> io::Result<()> {
        Ok(())
    }

    fn size_sync(&self) -> io::Result<u64> {
        let segments = self.segments.lock();
        let mut total = 0u64;
        for segment in segments.iter().flatten() {
            total += segment.size_sync()?;
        }
        Ok(total)
    }
}
