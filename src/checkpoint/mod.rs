//! Checkpoint metadata, directory layout, and discovery.
//!
//! The store produces two independent checkpoint families, index snapshots
//! under `index-checkpoints/` and hybrid-log snapshots under
//! `cpr-checkpoints/`, and recovery reconstructs state from the latest
//! mutually-compatible pair.

pub mod layout;

mod info;
mod store;

pub use info::{
    create_checkpoint_directory, write_completed_marker, HybridLogCheckpointInfo,
    IndexCheckpointInfo, SerializableIndexInfo, SerializableLogInfo, SessionResumePoint,
};
pub use layout::DirectoryLayout;
pub use store::{CheckpointKind, CheckpointStore};

use uuid::Uuid;

/// Token identifying a checkpoint.
pub type CheckpointToken = Uuid;

/// Log checkpoint backend.
///
/// - `Snapshot`: the fuzzy region is written to a `snapshot.dat` file in the
///   checkpoint directory; recovery copies it back onto the main log.
/// - `FoldOver`: the main log device is the checkpoint; recovery replays it
///   in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogCheckpointBackend {
    /// Snapshot checkpoint: writes `snapshot.dat` into the checkpoint
    /// directory.
    Snapshot,
    /// Fold-over checkpoint: relies on the main log device.
    FoldOver,
}

impl From<u8> for LogCheckpointBackend {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::FoldOver,
            _ => Self::Snapshot,
        }
    }
}

impl From<LogCheckpointBackend> for u8 {
    fn from(value: LogCheckpointBackend) -> Self {
        value as u8
    }
}
