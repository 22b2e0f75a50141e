//! High-level checkpoint and recovery entry points.
//!
//! Checkpoint creation here is deliberately simple (capture the index,
//! capture the log region, commit the marker) with none of the concurrent
//! coordination a live store layers on top. It produces exactly the artifacts
//! the recovery side consumes, which is what the crate's round-trip tests
//! exercise.

use std::io;

use uuid::Uuid;

use crate::allocator::HybridLog;
use crate::checkpoint::layout::snapshot_path;
use crate::checkpoint::{
    CheckpointStore, CheckpointToken, HybridLogCheckpointInfo, IndexCheckpointInfo,
    LogCheckpointBackend, SessionResumePoint,
};
use crate::constants::NUM_INDEX_CHUNKS;
use crate::device::{FileDevice, StorageDevice};
use crate::error::RecoveryError;
use crate::index::MemHashIndex;
use crate::recovery::{RecoveryDriver, RecoveryOutcome};

/// Capture an index checkpoint: the bucket array as it stands, cut at the
/// log's current tail.
///
/// The capture is fuzzy by design; concurrent writers may leave tentative
/// entries or addresses past the cut-point, and recovery compensates by
/// replaying the log from the cut-point.
pub fn checkpoint_index<D: StorageDevice>(
    store: &CheckpointStore,
    index: &MemHashIndex,
    hlog: &HybridLog<D>,
    version: u32,
) -> io::Result<CheckpointToken> {
    let token = Uuid::new_v4();
    let dir = store.create_index_checkpoint_dir(token)?;

    let cut = hlog.tail_address();
    let stats = index.write_checkpoint(&dir, NUM_INDEX_CHUNKS)?;

    let info = IndexCheckpointInfo {
        token,
        version,
        table_size: index.table_size(),
        num_chunks: stats.num_chunks,
        num_overflow_buckets: stats.num_overflow_buckets,
        num_entries: stats.num_entries,
        log_begin_address: hlog.begin_address(),
        checkpoint_start_address: cut,
    };
    store.commit_index_checkpoint(&info)?;

    if tracing::enabled!(tracing::Level::INFO) {
        tracing::info!(token = %token, cut = cut.control(), "index checkpoint committed");
    }
    Ok(token)
}

/// Capture a hybrid-log checkpoint through the configured backend.
///
/// Fold-over flushes the ring onto the main log device; snapshot writes the
/// not-yet-durable region `[flushed, tail]` into the checkpoint's
/// `snapshot.dat` instead. Either way the committed metadata records the
/// pre-capture flushed boundary, which is where snapshot-mode recovery starts
/// reading the snapshot file.
pub fn checkpoint_log<D: StorageDevice>(
    store: &CheckpointStore,
    hlog: &HybridLog<D>,
    backend: LogCheckpointBackend,
    version: u32,
    continue_tokens: Vec<SessionResumePoint>,
) -> io::Result<CheckpointToken> {
    let token = Uuid::new_v4();
    let dir = store.create_log_checkpoint_dir(token)?;

    let flushed = hlog.flushed_address();
    let final_address = hlog.tail_address();

    match backend {
        LogCheckpointBackend::FoldOver => {
            hlog.flush()?;
        }
        LogCheckpointBackend::Snapshot => {
            let snapshot = FileDevice::open(snapshot_path(&dir), true)?;
            hlog.write_snapshot(&snapshot, flushed, final_address)?;
        }
    }

    let info = HybridLogCheckpointInfo {
        token,
        version,
        use_snapshot_file: backend == LogCheckpointBackend::Snapshot,
        begin_address: hlog.begin_address(),
        start_logical_address: flushed,
        flushed_address: flushed,
        final_address,
        object_log_segment_offsets: hlog.segment_offsets(),
        continue_tokens,
    };
    store.commit_log_checkpoint(&info)?;

    if tracing::enabled!(tracing::Level::INFO) {
        tracing::info!(
            token = %token,
            final_address = final_address.control(),
            snapshot = info.use_snapshot_file,
            "log checkpoint committed"
        );
    }
    Ok(token)
}

/// Recover from the latest compatible checkpoint pair under `store`'s root.
pub fn recover_latest<D: StorageDevice>(
    store: &CheckpointStore,
    index: &mut MemHashIndex,
    hlog: &HybridLog<D>,
) -> Result<RecoveryOutcome, RecoveryError> {
    RecoveryDriver::new(store, index, hlog).recover_latest()
}

/// Recover from an explicit checkpoint pair.
pub fn recover<D: StorageDevice>(
    store: &CheckpointStore,
    index: &mut MemHashIndex,
    hlog: &HybridLog<D>,
    index_token: CheckpointToken,
    log_token: CheckpointToken,
) -> Result<RecoveryOutcome, RecoveryError> {
    RecoveryDriver::new(store, index, hlog).recover(index_token, log_token)
}

/// Convenience wrapper shared by tests and embedders: capture both
/// checkpoint families at once and return `(index_token, log_token)`.
pub fn checkpoint_full<D: StorageDevice>(
    store: &CheckpointStore,
    index: &MemHashIndex,
    hlog: &HybridLog<D>,
    backend: LogCheckpointBackend,
    version: u32,
    continue_tokens: Vec<SessionResumePoint>,
) -> io::Result<(CheckpointToken, CheckpointToken)> {
    let index_token = checkpoint_index(store, index, hlog, version)?;
    let log_token = checkpoint_log(store, hlog, backend, version, continue_tokens)?;
    Ok((index_token, log_token))
}
