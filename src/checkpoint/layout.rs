//! On-disk checkpoint directory layout.
//!
//! ```text
//! <root>/index-checkpoints/<uuid>/completed.dat     (marker, empty)
//! <root>/index-checkpoints/<uuid>/info.dat          (IndexCheckpointInfo)
//! <root>/index-checkpoints/<uuid>/ht.<n>.dat        (hash-table chunks)
//! <root>/cpr-checkpoints/<uuid>/completed.dat       (marker)
//! <root>/cpr-checkpoints/<uuid>/info.dat            (HybridLogCheckpointInfo)
//! <root>/cpr-checkpoints/<uuid>/snapshot.dat        (snapshot-mode only)
//! <root>/cpr-checkpoints/<uuid>/snapshot.obj.dat    (object payloads)
//! ```
//!
//! Tokens are 128-bit identifiers rendered in their canonical textual form.

use std::path::{Path, PathBuf};

use crate::checkpoint::CheckpointToken;

/// Subdirectory holding index checkpoints.
pub const INDEX_CHECKPOINT_DIR: &str = "index-checkpoints";

/// Subdirectory holding hybrid-log (CPR) checkpoints.
pub const CPR_CHECKPOINT_DIR: &str = "cpr-checkpoints";

/// Resolves checkpoint paths under a store root.
#[derive(Debug, Clone)]
pub struct DirectoryLayout {
    root: PathBuf,
}

impl DirectoryLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all index checkpoints.
    pub fn index_checkpoint_root(&self) -> PathBuf {
        self.root.join(INDEX_CHECKPOINT_DIR)
    }

    /// Directory holding all hybrid-log checkpoints.
    pub fn log_checkpoint_root(&self) -> PathBuf {
        self.root.join(CPR_CHECKPOINT_DIR)
    }

    /// Directory of one index checkpoint.
    pub fn index_checkpoint_dir(&self, token: CheckpointToken) -> PathBuf {
        self.index_checkpoint_root().join(token.to_string())
    }

    /// Directory of one hybrid-log checkpoint.
    pub fn log_checkpoint_dir(&self, token: CheckpointToken) -> PathBuf {
        self.log_checkpoint_root().join(token.to_string())
    }
}

/// The completion marker inside a checkpoint directory.
pub fn completed_marker_path(checkpoint_dir: &Path) -> PathBuf {
    checkpoint_dir.join("completed.dat")
}

/// The metadata file inside a checkpoint directory.
pub fn info_path(checkpoint_dir: &Path) -> PathBuf {
    checkpoint_dir.join("info.dat")
}

/// Hash-table chunk `n` inside an index checkpoint directory.
pub fn hash_table_chunk_path(checkpoint_dir: &Path, chunk: u32) -> PathBuf {
    checkpoint_dir.join(format!("ht.{chunk}.dat"))
}

/// The log snapshot file inside a hybrid-log checkpoint directory.
pub fn snapshot_path(checkpoint_dir: &Path) -> PathBuf {
    checkpoint_dir.join("snapshot.dat")
}

/// The object-log snapshot file inside a hybrid-log checkpoint directory.
pub fn object_log_snapshot_path(checkpoint_dir: &Path) -> PathBuf {
    checkpoint_dir.join("snapshot.obj.dat")
}
