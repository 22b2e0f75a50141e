//! Per-run recovery status: the synchronization substrate between the
//! single-threaded orchestrator and the I/O worker.
//!
//! One status word per ring frame, for reads and for flushes. Completions
//! publish `Done` with a release store on the I/O worker; the orchestrator
//! polls with acquire loads and coarse sleeps. No locks are held on the ring.
//!
//! I/O failures flip a shared error flag that every poll loop checks, so a
//! dead device surfaces as an error instead of a silent hang; the frame's own
//! status stays `Pending`.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::RecoveryError;

const PENDING: u8 = 0;
const DONE: u8 = 1;

/// How long the orchestrator sleeps between polls.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Shared per-frame status words, one slot per ring frame.
#[derive(Debug)]
pub(crate) struct RingStatus {
    read_status: Vec<AtomicU8>,
    flush_status: Vec<AtomicU8>,
    io_failed: AtomicBool,
}

impl RingStatus {
    fn new(capacity: u32) -> Self {
        let mut read_status = Vec::with_capacity(capacity as usize);
        let mut flush_status = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            read_status.push(AtomicU8::new(PENDING));
            // Nothing has been handed to the flusher yet.
            flush_status.push(AtomicU8::new(DONE));
        }
        Self {
            read_status,
            flush_status,
            io_failed: AtomicBool::new(false),
        }
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.read_status.len() as u32
    }

    pub(crate) fn index_of(&self, page: u64) -> usize {
        (page % self.read_status.len() as u64) as usize
    }

    pub(crate) fn set_read_done(&self, page: u64) {
        self.read_status[self.index_of(page)].store(DONE, Ordering::Release);
    }

    pub(crate) fn set_flush_done(&self, page: u64) {
        self.flush_status[self.index_of(page)].store(DONE, Ordering::Release);
    }

    pub(crate) fn set_read_pending(&self, page: u64) {
        self.read_status[self.index_of(page)].store(PENDING, Ordering::Release);
    }

    pub(crate) fn set_flush_pending(&self, page: u64) {
        self.flush_status[self.index_of(page)].store(PENDING, Ordering::Release);
    }

    pub(crate) fn read_done(&self, page: u64) -> bool {
        self.read_status[self.index_of(page)].load(Ordering::Acquire) == DONE
    }

    fn flush_done_at(&self, idx: usize) -> bool {
        self.flush_status[idx].load(Ordering::Acquire) == DONE
    }

    pub(crate) fn fail(&self) {
        self.io_failed.store(true, Ordering::Release);
    }

    pub(crate) fn failed(&self) -> bool {
        self.io_failed.load(Ordering::Acquire)
    }
}

/// Per-run recovery scratch: the page range being processed and the shared
/// status words for the ring frames covering it.
#[derive(Debug)]
pub struct RecoveryStatus {
    /// First page of the run.
    pub start_page: u64,
    /// One past the last page of the run.
    pub end_page: u64,
    ring: Arc<RingStatus>,
}

impl RecoveryStatus {
    /// Create status for pages `[start_page, end_page)` over a ring of
    /// `capacity` frames.
    pub fn new(start_page: u64, end_page: u64, capacity: u32) -> Self {
        Self {
            start_page,
            end_page,
            ring: Arc::new(RingStatus::new(capacity)),
        }
    }

    pub(crate) fn ring(&self) -> Arc<RingStatus> {
        Arc::clone(&self.ring)
    }

    /// Mark `page`'s frame as awaiting a read. Done by the orchestrator right
    /// before the frame gets recycled for `page`.
    pub fn mark_read_pending(&self, page: u64) {
        self.ring.set_read_pending(page);
    }

    /// Mark `page`'s frame as awaiting a flush.
    pub fn mark_flush_pending(&self, page: u64) {
        self.ring.set_flush_pending(page);
    }

    /// Whether `page`'s read has completed.
    pub fn read_done(&self, page: u64) -> bool {
        self.ring.read_done(page)
    }

    /// Spin until `page`'s read completes.
    pub fn wait_read_done(&self, page: u64) -> Result<(), RecoveryError> {
        loop {
            if self.ring.failed() {
                return Err(io_failed_error());
            }
            if self.ring.read_done(page) {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Spin until every outstanding flush completes.
    pub fn wait_all_flushed(&self) -> Result<(), RecoveryError> {
        for idx in 0..self.ring.capacity() as usize {
            loop {
                if self.ring.failed() {
                    return Err(io_failed_error());
                }
                if self.ring.flush_done_at(idx) {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
        Ok(())
    }
}

fn io_failed_error() -> RecoveryError {
    RecoveryError::Io(std::io::Error::other(
        "page I/O failed; see log for the device error",
    ))
}
