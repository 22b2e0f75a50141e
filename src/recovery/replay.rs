//! Log replay: brings the fuzzy hash index up to date with the log tail.
//!
//! The index checkpoint was captured without quiescing writers, so its
//! buckets are only trustworthy below the checkpoint's cut-point. Replay
//! walks every record in `[cut-point, final)` and re-installs bucket entries
//! so each one ends at the newest record whose version is within the
//! checkpoint's epoch; newer spill-over records are invalidated in place and
//! the invalidation is flushed back to the main log.

use std::sync::Arc;

use crate::address::Address;
use crate::allocator::HybridLog;
use crate::checkpoint::{HybridLogCheckpointInfo, IndexCheckpointInfo};
use crate::device::StorageDevice;
use crate::error::RecoveryError;
use crate::index::{HashBucketEntry, KeyHash, MemHashIndex};
use crate::record::{self, RecordInfo, HEADER_SIZE};
use crate::recovery::page_io::{PageIo, PageSource, ReplayIoPlan};
use crate::recovery::status::RecoveryStatus;

/// Walks the log tail page-by-page, updating hash buckets per record.
pub struct LogReplayer<'a, D: StorageDevice> {
    hlog: &'a HybridLog<D>,
    index: &'a MemHashIndex,
    page_io: &'a PageIo,
    index_info: &'a IndexCheckpointInfo,
    log_info: &'a HybridLogCheckpointInfo,
}

impl<'a, D: StorageDevice> LogReplayer<'a, D> {
    /// Create a replayer over injected collaborators.
    pub fn new(
        hlog: &'a HybridLog<D>,
        index: &'a MemHashIndex,
        page_io: &'a PageIo,
        index_info: &'a IndexCheckpointInfo,
        log_info: &'a HybridLogCheckpointInfo,
    ) -> Self {
        Self {
            hlog,
            index,
            page_io,
            index_info,
            log_info,
        }
    }

    /// Replay `[index cut-point, log final)`.
    ///
    /// In fold-over mode pages are read from (and written back to) the main
    /// log in place. In snapshot mode `snapshot` supplies the read source and
    /// the flushes make the main log contiguous through the final address.
    pub fn replay(&self, snapshot: Option<PageSource>) -> Result<(), RecoveryError> {
        let from = self.index_info.checkpoint_start_address;
        let until = self.log_info.final_address;

        // The page range covers the whole not-yet-durable region, not just
        // the scan window: even with nothing to scan, snapshot-mode pages
        // must still be copied onto the main log.
        let start_page = self.hlog.page_of(from.min(self.log_info.flushed_address));
        let end_page = self.hlog.page_of_rounded_up(until);
        if end_page <= start_page {
            return Ok(());
        }
        let capacity = self.hlog.capacity_pages();

        tracing::debug!(
            from = from.control(),
            until = until.control(),
            start_page,
            end_page,
            snapshot = snapshot.is_some(),
            "log replay start"
        );

        let main = PageSource::main(Arc::clone(self.hlog.device()) as Arc<dyn StorageDevice>);
        let plan = Arc::new(ReplayIoPlan {
            read: snapshot.unwrap_or_else(|| main.clone()),
            flush: main,
            end_page,
        });

        let status = RecoveryStatus::new(start_page, end_page, capacity);

        // Prime the ring, routing each page to whichever device holds it.
        let prime = (capacity as u64).min(end_page - start_page);
        for page in start_page..start_page + prime {
            self.page_io.read_pages(page, 1, plan.source_for(page), &status);
        }

        let page_size = self.hlog.page_size();
        for page in start_page..end_page {
            status.wait_read_done(page)?;

            let page_start = self.hlog.page_start(page);
            let page_end = self.hlog.page_start(page + 1);

            // Pages wholly below the replay window (possible in snapshot
            // mode) are copied through without touching the index.
            if from < page_end {
                let page_from = if from > page_start {
                    self.hlog.offset_in_page(from)
                } else {
                    0
                };
                let page_until = if until < page_end {
                    self.hlog.offset_in_page(until)
                } else {
                    page_size
                };
                self.recover_from_page(page, page_from, page_until);
            }

            // Hand the frame to the flusher; its next occupant (page + C)
            // arrives via the worker's read-ahead once the flush lands.
            status.mark_read_pending(page);
            status.mark_flush_pending(page);
            self.page_io.flush_pages(page, 1, &plan, &status);
        }

        status.wait_all_flushed()?;

        tracing::debug!(pages = end_page - start_page, "log replay complete");
        Ok(())
    }

    /// Walk the records of one page within `[page_from, page_until)`.
    fn recover_from_page(&self, page: u64, page_from: usize, page_until: usize) {
        let version = self.log_info.version;
        let begin_address = self.log_info.begin_address;
        let start_recovery_address = self.index_info.checkpoint_start_address;
        let page_base = self.hlog.page_start(page).control();

        self.hlog.ring().with_frame_mut(page, |frame| {
            let mut pointer = page_from;
            while pointer < page_until {
                let info = RecordInfo::from_control(record::header_at(frame, pointer));

                // A null header is page-tail padding, 8 bytes wide.
                if info.is_null() {
                    pointer += HEADER_SIZE;
                    continue;
                }
                if info.is_invalid() {
                    pointer += record::record_size_at(frame, pointer);
                    continue;
                }

                let size = record::record_size_at(frame, pointer);
                let hash = KeyHash::from_key(record::key_at(frame, pointer));
                let slot = self.index.find_or_create_tag(hash, begin_address);

                if u32::from(info.version()) <= version {
                    // Within the recovered epoch: this is the newest version
                    // seen so far, point the bucket at it.
                    let address = Address::from_control(page_base + pointer as u64);
                    self.index
                        .install(&slot, HashBucketEntry::new(address, hash.tag()));
                } else {
                    // In-flight spill-over from the next epoch: invalidate it
                    // on the page (the flush persists the bit) and rewind the
                    // bucket to the chain's stable tail if that tail precedes
                    // the replay window. Otherwise leave the slot alone; the
                    // prior in-range version is still ahead in the scan.
                    info.set_invalid();
                    record::set_header_at(frame, pointer, info.control());

                    let previous = info.previous_address();
                    if previous.is_valid() && previous < start_recovery_address {
                        self.index
                            .install(&slot, HashBucketEntry::new(previous, hash.tag()));
                    }
                }

                pointer += size;
            }
        });
    }
}
