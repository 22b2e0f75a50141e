//! Bounded ring I/O for recovery.
//!
//! `PageIo` moves log pages between a storage device and the in-memory page
//! ring. Requests are queued to a dedicated I/O worker thread (which drives
//! the async device trait on its own runtime); completions flip the per-frame
//! status words that the orchestrator polls.
//!
//! The memory bound comes from the *read-ahead after flush* discipline: when
//! the flush of page `p` completes, the worker immediately issues the read of
//! page `p + C` into the frame just vacated (when `p + C` is still inside the
//! replay range). The ring therefore never holds more than `C` pages.

use std::sync::Arc;
use std::thread;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::allocator::PageRing;
use crate::device::StorageDevice;
use crate::recovery::status::{RecoveryStatus, RingStatus};

/// Where pages are read from: a device plus a page-offset translation.
///
/// Logical page `p` lives at device byte offset
/// `(p - page_offset) * page_size`. The main log uses `page_offset = 0`; a
/// snapshot file starts at the page of the checkpoint's flushed address.
#[derive(Clone)]
pub struct PageSource {
    device: Arc<dyn StorageDevice>,
    page_offset: u64,
}

impl PageSource {
    /// The main log device: pages at their logical offsets.
    pub fn main(device: Arc<dyn StorageDevice>) -> Self {
        Self {
            device,
            page_offset: 0,
        }
    }

    /// A snapshot file holding pages from `page_offset` onwards.
    pub fn snapshot(device: Arc<dyn StorageDevice>, page_offset: u64) -> Self {
        Self {
            device,
            page_offset,
        }
    }

    fn byte_offset(&self, page: u64, page_size: u64) -> u64 {
        debug_assert!(page >= self.page_offset);
        (page - self.page_offset) * page_size
    }
}

impl std::fmt::Debug for PageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSource")
            .field("page_offset", &self.page_offset)
            .finish()
    }
}

/// Per-run I/O routing for the replay loop: where pages are read from, where
/// they are flushed to, and where the range ends (bounding read-ahead).
#[derive(Debug, Clone)]
pub struct ReplayIoPlan {
    /// Read source (main log in fold-over mode, snapshot file otherwise).
    pub read: PageSource,
    /// Flush destination; always the main log.
    pub flush: PageSource,
    /// One past the last page of the replay range.
    pub end_page: u64,
}

impl ReplayIoPlan {
    /// Where `page` is read from. A snapshot file only holds pages from its
    /// page offset onward; anything below that was already durable on the
    /// main log when the checkpoint was taken.
    pub fn source_for(&self, page: u64) -> &PageSource {
        if page < self.read.page_offset {
            &self.flush
        } else {
            &self.read
        }
    }
}

enum IoRequest {
    Read {
        page: u64,
        source: PageSource,
        status: Arc<RingStatus>,
    },
    Flush {
        page: u64,
        plan: Arc<ReplayIoPlan>,
        status: Arc<RingStatus>,
    },
    Shutdown,
}

/// Async page mover over the in-memory ring.
pub struct PageIo {
    ring: Arc<PageRing>,
    tx: Sender<IoRequest>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PageIo {
    /// Spawn the I/O worker over `ring`.
    pub fn new(ring: Arc<PageRing>) -> Self {
        let (tx, rx) = unbounded();
        let worker_ring = Arc::clone(&ring);
        let worker = thread::spawn(move || worker_loop(worker_ring, rx));

        Self {
            ring,
            tx,
            worker: Some(worker),
        }
    }

    /// Issue reads for pages `[start_page, start_page + num_pages)` from
    /// `source`. Each completion populates the frame at `page mod C` and
    /// flips its read status to done.
    pub fn read_pages(
        &self,
        start_page: u64,
        num_pages: u64,
        source: &PageSource,
        status: &RecoveryStatus,
    ) {
        for page in start_page..start_page + num_pages {
            status.mark_read_pending(page);
            self.send(
                IoRequest::Read {
                    page,
                    source: source.clone(),
                    status: status.ring(),
                },
                status,
            );
        }
    }

    /// Issue flushes for pages `[page, page + num_pages)` to the plan's flush
    /// destination. When a flush completes and `page + C` is still inside the
    /// plan's range, the worker immediately reads `page + C` into the vacated
    /// frame. The caller marks the frame's read and flush words pending
    /// before calling.
    pub fn flush_pages(
        &self,
        page: u64,
        num_pages: u64,
        plan: &Arc<ReplayIoPlan>,
        status: &RecoveryStatus,
    ) {
        for page in page..page + num_pages {
            self.send(
                IoRequest::Flush {
                    page,
                    plan: Arc::clone(plan),
                    status: status.ring(),
                },
                status,
            );
        }
    }

    fn send(&self, request: IoRequest, status: &RecoveryStatus) {
        if self.tx.send(request).is_err() {
            // Worker is gone; surface it through the poll loops.
            status.ring().fail();
        }
    }
}

impl Drop for PageIo {
    fn drop(&mut self) {
        let _ = self.tx.send(IoRequest::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(ring: Arc<PageRing>, rx: Receiver<IoRequest>) {
    // One runtime for the worker's lifetime; the device futures are small.
    let rt = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "recovery I/O worker failed to start");
            while let Ok(request) = rx.recv() {
                match request {
                    IoRequest::Shutdown => break,
                    IoRequest::Read { status, .. } | IoRequest::Flush { status, .. } => {
                        status.fail()
                    }
                }
            }
            return;
        }
    };

    while let Ok(request) = rx.recv() {
        match request {
            IoRequest::Shutdown => break,
            IoRequest::Read {
                page,
                source,
                status,
            } => {
                do_read(&rt, &ring, page, &source, &status);
            }
            IoRequest::Flush { page, plan, status } => {
                if do_flush(&rt, &ring, page, &plan, &status) {
                    let next = page + ring.capacity() as u64;
                    if next < plan.end_page {
                        do_read(&rt, &ring, next, plan.source_for(next), &status);
                    }
                }
            }
        }
    }
}

fn do_read(
    rt: &tokio::runtime::Runtime,
    ring: &PageRing,
    page: u64,
    source: &PageSource,
    status: &RingStatus,
) {
    let page_size = ring.page_size();
    let mut buf = vec![0u8; page_size];
    let offset = source.byte_offset(page, page_size as u64);

    match rt.block_on(source.device.read(offset, &mut buf)) {
        Ok(_) => {
            ring.populate_page(page, &buf);
            status.set_read_done(page);
        }
        Err(e) => {
            tracing::error!(page, error = %e, "recovery page read failed");
            status.fail();
        }
    }
}

fn do_flush(
    rt: &tokio::runtime::Runtime,
    ring: &PageRing,
    page: u64,
    plan: &ReplayIoPlan,
    status: &RingStatus,
) -> bool {
    let page_size = ring.page_size();
    let bytes = ring.with_frame(page, |frame| frame.to_vec());
    let offset = plan.flush.byte_offset(page, page_size as u64);

    match rt.block_on(plan.flush.device.write(offset, &bytes)) {
        Ok(_) => {
            status.set_flush_done(page);
            true
        }
        Err(e) => {
            tracing::error!(page, error = %e, "recovery page flush failed");
            status.fail();
            false
        }
    }
}
