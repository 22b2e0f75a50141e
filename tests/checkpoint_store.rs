//! Checkpoint discovery and validation, exercised through the driver.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cinderkv::address::Address;
use cinderkv::allocator::HybridLog;
use cinderkv::checkpoint::{
    layout, CheckpointKind, CheckpointStore, HybridLogCheckpointInfo, IndexCheckpointInfo,
    LogCheckpointBackend,
};
use cinderkv::config::StoreConfig;
use cinderkv::device::FileDevice;
use cinderkv::error::RecoveryError;
use cinderkv::index::MemHashIndex;
use cinderkv::ops;
use tempfile::tempdir;
use uuid::Uuid;

use common::{key_for, upsert, value_for};

fn test_config() -> StoreConfig {
    StoreConfig {
        table_size: 512,
        page_size_bits: 10,
        memory_pages: 4,
        head_offset_lag_pages: 2,
        ..StoreConfig::default()
    }
}

fn open_log(dir: &Path) -> HybridLog<FileDevice> {
    let device = Arc::new(FileDevice::open(dir.join("log.dat"), true).unwrap());
    HybridLog::new(&test_config(), device)
}

fn index_info_with_cut(token: Uuid, cut: u64) -> IndexCheckpointInfo {
    IndexCheckpointInfo {
        token,
        version: 1,
        table_size: 512,
        num_chunks: 8,
        num_overflow_buckets: 0,
        num_entries: 0,
        log_begin_address: Address::FIRST_VALID,
        checkpoint_start_address: Address::from_control(cut),
    }
}

fn log_info_with_final(token: Uuid, final_address: u64) -> HybridLogCheckpointInfo {
    HybridLogCheckpointInfo {
        token,
        version: 1,
        use_snapshot_file: false,
        begin_address: Address::FIRST_VALID,
        start_logical_address: Address::FIRST_VALID,
        flushed_address: Address::FIRST_VALID,
        final_address: Address::from_control(final_address),
        object_log_segment_offsets: Vec::new(),
        continue_tokens: Vec::new(),
    }
}

#[test]
fn test_recover_latest_without_checkpoints() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let mut index = MemHashIndex::new();
    let hlog = open_log(dir.path());

    assert!(matches!(
        ops::recover_latest(&store, &mut index, &hlog),
        Err(RecoveryError::NoCheckpoint)
    ));
}

#[test]
fn test_incomplete_checkpoint_is_pruned_and_never_selected() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let complete_log_token;
    {
        let mut index = MemHashIndex::new();
        index.initialize(512);
        let hlog = open_log(dir.path());
        for k in 0..50u64 {
            upsert(&index, &hlog, &key_for(k), &value_for(k), 1);
        }
        let (_, log_token) = ops::checkpoint_full(
            &store,
            &index,
            &hlog,
            LogCheckpointBackend::FoldOver,
            1,
            Vec::new(),
        )
        .unwrap();
        complete_log_token = log_token;
    }

    // A newer, marker-less log checkpoint folder: a writer died mid-capture.
    thread::sleep(Duration::from_millis(20));
    let dead = Uuid::new_v4();
    let dead_dir = store.create_log_checkpoint_dir(dead).unwrap();
    fs::write(layout::info_path(&dead_dir), b"{}").unwrap();

    let mut index = MemHashIndex::new();
    let hlog = open_log(dir.path());
    let outcome = ops::recover_latest(&store, &mut index, &hlog).unwrap();

    assert_eq!(outcome.log_token, complete_log_token);
    assert!(!dead_dir.exists(), "incomplete folder must be gone");
}

#[test]
fn test_incompatible_pair_fails_without_mutations() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    // Index snapshot cut at 10_000, log snapshot ending at 8_000.
    let index_token = Uuid::new_v4();
    store.create_index_checkpoint_dir(index_token).unwrap();
    store
        .commit_index_checkpoint(&index_info_with_cut(index_token, 10_000))
        .unwrap();

    let log_token = Uuid::new_v4();
    store.create_log_checkpoint_dir(log_token).unwrap();
    store
        .commit_log_checkpoint(&log_info_with_final(log_token, 8_000))
        .unwrap();

    let mut index = MemHashIndex::new();
    let hlog = open_log(dir.path());

    let err = ops::recover(&store, &mut index, &hlog, index_token, log_token).unwrap_err();
    assert!(matches!(
        err,
        RecoveryError::Incompatible {
            index_address: 10_000,
            log_address: 8_000,
        }
    ));

    // Nothing was touched.
    assert!(!index.is_initialized());
    assert_eq!(hlog.tail_address(), Address::FIRST_VALID);
}

#[test]
fn test_missing_marker_is_reported() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let index_token = Uuid::new_v4();
    store.create_index_checkpoint_dir(index_token).unwrap();
    store
        .commit_index_checkpoint(&index_info_with_cut(index_token, 64))
        .unwrap();

    // Log folder exists with metadata but never gained its marker.
    let log_token = Uuid::new_v4();
    let log_dir = store.create_log_checkpoint_dir(log_token).unwrap();
    log_info_with_final(log_token, 4096)
        .write_to_file(&layout::info_path(&log_dir))
        .unwrap();

    let mut index = MemHashIndex::new();
    let hlog = open_log(dir.path());

    let err = ops::recover(&store, &mut index, &hlog, index_token, log_token).unwrap_err();
    assert!(matches!(err, RecoveryError::MissingMarker { token } if token == log_token));
}

#[test]
fn test_corrupt_metadata_is_reported() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let index_token = Uuid::new_v4();
    store.create_index_checkpoint_dir(index_token).unwrap();
    store
        .commit_index_checkpoint(&index_info_with_cut(index_token, 64))
        .unwrap();

    let log_token = Uuid::new_v4();
    let log_dir = store.create_log_checkpoint_dir(log_token).unwrap();
    fs::write(layout::info_path(&log_dir), b"{ not json at all").unwrap();
    cinderkv::checkpoint::write_completed_marker(&log_dir).unwrap();

    let mut index = MemHashIndex::new();
    let hlog = open_log(dir.path());

    let err = ops::recover(&store, &mut index, &hlog, index_token, log_token).unwrap_err();
    assert!(matches!(err, RecoveryError::CorruptMetadata { .. }));
}

#[test]
fn test_latest_full_pair_requires_both_markers() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    // A log-only token is not a FULL checkpoint.
    let token = Uuid::new_v4();
    store.create_log_checkpoint_dir(token).unwrap();
    store
        .commit_log_checkpoint(&log_info_with_final(token, 4096))
        .unwrap();

    assert!(store.is_safe(token, CheckpointKind::HybridLogOnly));
    assert!(!store.is_safe(token, CheckpointKind::Full));
    assert!(matches!(
        store.latest_token(CheckpointKind::Full),
        Err(RecoveryError::NoCheckpoint)
    ));
}
