//! cinderkv - crash-recovery core for a log-structured, hash-indexed
//! key-value store
//!
//! The store keeps its data in a hybrid (memory + disk) append-only log and
//! locates records through a cache-line hash index. Crash tolerance comes
//! from two independent checkpoint families, index snapshots and hybrid-log
//! snapshots, and a recovery subsystem that reconstructs a consistent state
//! from the latest mutually-compatible pair:
//!
//! - the index snapshot is *fuzzy* (captured without quiescing writers), so
//!   recovery replays the log tail to bring every bucket up to date;
//! - replay streams pages through a fixed ring of `C` frames with async disk
//!   I/O, so memory stays bounded no matter how long the tail is;
//! - records stamped with a version newer than the checkpoint's epoch are
//!   invalidated in place and the invalidation is persisted back to the log.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use cinderkv::prelude::*;
//!
//! let store = CheckpointStore::new("/data/store");
//! let mut index = MemHashIndex::new();
//! let hlog = HybridLog::new(&config, device);
//!
//! let outcome = RecoveryDriver::new(&store, &mut index, &hlog).recover_latest()?;
//! ```

#![warn(missing_docs)]

pub mod address;
pub mod allocator;
pub mod checkpoint;
pub mod config;
pub mod device;
pub mod error;
pub mod index;
pub mod ops;
pub mod record;
pub mod recovery;
pub mod state;
mod utility;

// Re-exports for convenience
pub use address::{Address, AtomicAddress};
pub use error::RecoveryError;
pub use record::RecordInfo;

/// Constants used throughout the library.
pub mod constants {
    /// Size of a cache line in bytes.
    pub const CACHE_LINE_BYTES: usize = 64;

    /// Default number of chunk files an index checkpoint is split into.
    pub const NUM_INDEX_CHUNKS: u32 = 8;
}

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::address::Address;
    pub use crate::allocator::HybridLog;
    pub use crate::checkpoint::{CheckpointStore, LogCheckpointBackend};
    pub use crate::config::StoreConfig;
    pub use crate::error::RecoveryError;
    pub use crate::index::MemHashIndex;
    pub use crate::recovery::{RecoveryDriver, RecoveryOutcome};
}
