//! Recovery orchestration.
//!
//! The driver is handed its collaborators (checkpoint store, hash index,
//! hybrid log) and runs the whole sequence single-threaded: find a compatible
//! checkpoint pair, restore the fuzzy index, replay the log tail, restore the
//! warm page window, and rehydrate session resume points. I/O completions
//! happen on the `PageIo` worker; everything else is this thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::address::Address;
use crate::allocator::HybridLog;
use crate::checkpoint::layout::snapshot_path;
use crate::checkpoint::{
    CheckpointKind, CheckpointStore, CheckpointToken, HybridLogCheckpointInfo, SessionResumePoint,
};
use crate::device::{FileDevice, StorageDevice};
use crate::error::RecoveryError;
use crate::index::MemHashIndex;
use crate::recovery::page_io::{PageIo, PageSource};
use crate::recovery::replay::LogReplayer;
use crate::recovery::status::RecoveryStatus;
use crate::state::{RecoveryPhase, SystemState};

/// Thread-safe map of per-session resume points recovered from a log
/// checkpoint's continue tokens.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<Uuid, Address>>,
}

impl SessionRegistry {
    fn from_resume_points(points: &[SessionResumePoint]) -> Self {
        let inner = points
            .iter()
            .map(|p| (p.guid, p.resume_address))
            .collect();
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// The resume point for `guid`, if that session was captured.
    pub fn resume_address(&self, guid: &Uuid) -> Option<Address> {
        self.inner.read().get(guid).copied()
    }

    /// Claim (and remove) the resume point for `guid`.
    pub fn take(&self, guid: &Uuid) -> Option<Address> {
        self.inner.write().remove(guid)
    }

    /// Number of recovered sessions.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether any sessions were recovered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// What recovery hands back to the store.
#[derive(Debug)]
pub struct RecoveryOutcome {
    /// The index checkpoint that was used.
    pub index_token: CheckpointToken,
    /// The log checkpoint that was used.
    pub log_token: CheckpointToken,
    /// The new system state: phase Rest, version `v + 1`.
    pub state: SystemState,
    /// Recovered session resume points.
    pub sessions: Arc<SessionRegistry>,
}

/// Orchestrates a recovery run.
pub struct RecoveryDriver<'a, D: StorageDevice> {
    store: &'a CheckpointStore,
    index: &'a mut MemHashIndex,
    hlog: &'a HybridLog<D>,
}

impl<'a, D: StorageDevice> RecoveryDriver<'a, D> {
    /// Create a driver over injected collaborators.
    pub fn new(
        store: &'a CheckpointStore,
        index: &'a mut MemHashIndex,
        hlog: &'a HybridLog<D>,
    ) -> Self {
        Self { store, index, hlog }
    }

    /// Prune incomplete checkpoints, pick the latest index and log tokens,
    /// and recover from them.
    pub fn recover_latest(self) -> Result<RecoveryOutcome, RecoveryError> {
        self.store.prune_incomplete()?;
        let index_token = self.store.latest_token(CheckpointKind::IndexOnly)?;
        let log_token = self.store.latest_token(CheckpointKind::HybridLogOnly)?;
        self.recover(index_token, log_token)
    }

    /// Recover from an explicit checkpoint pair.
    pub fn recover(
        self,
        index_token: CheckpointToken,
        log_token: CheckpointToken,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        let started_at = Instant::now();
        if tracing::enabled!(tracing::Level::INFO) {
            tracing::info!(index_token = %index_token, log_token = %log_token, "recovery start");
        }

        let result = self.run(index_token, log_token);
        match &result {
            Ok(outcome) => {
                if tracing::enabled!(tracing::Level::INFO) {
                    tracing::info!(
                        version = outcome.state.version,
                        sessions = outcome.sessions.len(),
                        duration_ms = started_at.elapsed().as_millis(),
                        "recovery completed"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(index_token = %index_token, log_token = %log_token, error = %e, "recovery failed");
            }
        }
        result
    }

    fn run(
        self,
        index_token: CheckpointToken,
        log_token: CheckpointToken,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        tracing::debug!(phase = ?RecoveryPhase::LoadingMetadata, "recovery phase");

        if !self.store.is_safe(index_token, CheckpointKind::IndexOnly) {
            return Err(RecoveryError::MissingMarker { token: index_token });
        }
        if !self.store.is_safe(log_token, CheckpointKind::HybridLogOnly) {
            return Err(RecoveryError::MissingMarker { token: log_token });
        }

        let index_info = self.store.load_index_info(index_token)?;
        let log_info = self.store.load_log_info(log_token)?;

        if !CheckpointStore::is_compatible(&index_info, &log_info) {
            return Err(RecoveryError::Incompatible {
                index_address: index_info.checkpoint_start_address.control(),
                log_address: log_info.final_address.control(),
            });
        }

        // The recovered epoch: version-v records are the last survivors, the
        // store resumes at v + 1.
        let state = SystemState::rest(log_info.version + 1);

        tracing::debug!(phase = ?RecoveryPhase::RestoringIndex, "recovery phase");
        let index_dir = self.store.layout().index_checkpoint_dir(index_token);
        self.index
            .recover(&index_dir, &index_info)
            .map_err(|e| classify_restore_error(index_token, e))?;

        self.hlog
            .set_segment_offsets(log_info.object_log_segment_offsets.clone());

        let page_io = PageIo::new(Arc::clone(self.hlog.ring()));

        tracing::debug!(phase = ?RecoveryPhase::ReplayingLog, "recovery phase");
        let snapshot = self.open_snapshot_source(log_token, &log_info)?;
        LogReplayer::new(self.hlog, self.index, &page_io, &index_info, &log_info)
            .replay(snapshot)?;

        tracing::debug!(phase = ?RecoveryPhase::RestoringPages, "recovery phase");
        self.restore_page_window(&page_io, &log_info)?;

        tracing::debug!(phase = ?RecoveryPhase::RestoringSessions, "recovery phase");
        let sessions = Arc::new(SessionRegistry::from_resume_points(&log_info.continue_tokens));

        Ok(RecoveryOutcome {
            index_token,
            log_token,
            state,
            sessions,
        })
    }

    /// In snapshot mode, the fuzzy region is read from the checkpoint's
    /// snapshot file; logical page `p` sits at `p - page(flushed)` within it.
    fn open_snapshot_source(
        &self,
        log_token: CheckpointToken,
        log_info: &HybridLogCheckpointInfo,
    ) -> Result<Option<PageSource>, RecoveryError> {
        if !log_info.use_snapshot_file {
            return Ok(None);
        }

        let dir = self.store.layout().log_checkpoint_dir(log_token);
        let device = FileDevice::open_existing(snapshot_path(&dir))?;
        let page_offset = self.hlog.page_of(log_info.flushed_address);
        Ok(Some(PageSource::snapshot(Arc::new(device), page_offset)))
    }

    /// Read the warm window `[head_page, tail_page]` back into the ring and
    /// hand the log its post-recovery watermarks.
    fn restore_page_window(
        &self,
        page_io: &PageIo,
        log_info: &HybridLogCheckpointInfo,
    ) -> Result<(), RecoveryError> {
        let final_address = log_info.final_address;
        let tail_page = self.hlog.page_of(final_address);
        let extra = if final_address > self.hlog.page_start(tail_page) {
            1
        } else {
            0
        };

        let capacity = self.hlog.capacity_pages() as u64;
        let lag = self.hlog.head_offset_lag_pages() as u64;
        let mut head_page = (tail_page + extra).saturating_sub(lag);
        // The window is bounded by the ring itself.
        if tail_page + 1 - head_page > capacity {
            head_page = tail_page + 1 - capacity;
        }

        let status = RecoveryStatus::new(head_page, tail_page + 1, self.hlog.capacity_pages());
        let main = PageSource::main(Arc::clone(self.hlog.device()) as Arc<dyn StorageDevice>);
        page_io.read_pages(head_page, tail_page - head_page + 1, &main, &status);
        for page in head_page..=tail_page {
            status.wait_read_done(page)?;
        }

        self.hlog.recovery_reset(
            log_info.begin_address,
            self.hlog.page_start(head_page),
            final_address,
        );
        Ok(())
    }
}

fn classify_restore_error(token: Uuid, err: std::io::Error) -> RecoveryError {
    match err.kind() {
        std::io::ErrorKind::InvalidData => RecoveryError::corrupt(token, err),
        _ => RecoveryError::Io(err),
    }
}
