//! Memory-bound verification: replaying a long log tail through a 4-frame
//! ring issues exactly one read and one flush per page.

mod common;

use std::sync::Arc;

use cinderkv::allocator::HybridLog;
use cinderkv::checkpoint::{CheckpointStore, LogCheckpointBackend};
use cinderkv::config::StoreConfig;
use cinderkv::device::FileDevice;
use cinderkv::index::MemHashIndex;
use cinderkv::ops;
use tempfile::tempdir;

use common::{key_for, read_value, upsert, value_for, CountingDevice};

const PAGE_SIZE_BITS: u32 = 10;
const RING_CAPACITY: u32 = 4;
const HEAD_LAG: u32 = 2;
const REPLAY_PAGES: u64 = 1000;

fn test_config() -> StoreConfig {
    StoreConfig {
        table_size: 8192,
        page_size_bits: PAGE_SIZE_BITS,
        memory_pages: RING_CAPACITY,
        head_offset_lag_pages: HEAD_LAG,
        ..StoreConfig::default()
    }
}

#[test]
fn test_thousand_page_replay_is_bounded() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));
    let device = Arc::new(CountingDevice::new(
        FileDevice::open(dir.path().join("log.dat"), true).unwrap(),
    ));

    let keys_written;
    {
        let mut index = MemHashIndex::new();
        index.initialize(test_config().table_size);
        let hlog = HybridLog::new(&test_config(), Arc::clone(&device));

        // Empty index checkpoint first: replay has to rebuild the whole
        // index from the log tail.
        ops::checkpoint_index(&store, &index, &hlog, 1).unwrap();

        // Fill the log so the replay range spans exactly REPLAY_PAGES pages:
        // the tail must end mid-way into page REPLAY_PAGES - 1.
        let mut k = 0u64;
        while hlog.page_of(hlog.tail_address()) + 1 < REPLAY_PAGES {
            upsert(&index, &hlog, &key_for(k), &value_for(k), 1);
            k += 1;
        }
        keys_written = k;

        ops::checkpoint_log(&store, &hlog, LogCheckpointBackend::FoldOver, 1, Vec::new()).unwrap();
    }

    device.reset();

    let mut index = MemHashIndex::new();
    let hlog = HybridLog::new(&test_config(), Arc::clone(&device));
    ops::recover_latest(&store, &mut index, &hlog).unwrap();

    // One flush per replayed page, nothing else writes during recovery.
    assert_eq!(device.writes(), REPLAY_PAGES);

    // One read per replayed page (priming reads plus read-ahead after each
    // flush), plus the warm-window reads at the end: the final address is
    // mid-page, so the window is exactly HEAD_LAG pages.
    let tail_page = hlog.page_of(hlog.tail_address());
    assert_eq!(tail_page, REPLAY_PAGES - 1);
    assert_ne!(hlog.offset_in_page(hlog.tail_address()), 0);
    assert_eq!(device.reads(), REPLAY_PAGES + HEAD_LAG as u64);

    // The rebuilt index serves every key.
    assert!(keys_written > 20_000);
    for k in (0..keys_written).step_by(997) {
        assert_eq!(
            read_value(&index, &hlog, &key_for(k)).as_deref(),
            Some(value_for(k).as_slice()),
            "key {k} after bounded replay"
        );
    }
}
