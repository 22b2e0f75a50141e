//! Checkpoint discovery, validation and commit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use uuid::Uuid;

use crate::checkpoint::layout::{completed_marker_path, info_path, DirectoryLayout};
use crate::checkpoint::{
    create_checkpoint_directory, write_completed_marker, CheckpointToken, HybridLogCheckpointInfo,
    IndexCheckpointInfo,
};
use crate::error::RecoveryError;

/// Which checkpoint family (or both) an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Index checkpoint only.
    IndexOnly,
    /// Hybrid-log checkpoint only.
    HybridLogOnly,
    /// Both families.
    Full,
}

/// Enumerates checkpoint folders, prunes incomplete ones, loads metadata.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    layout: DirectoryLayout,
}

impl CheckpointStore {
    /// Create a store over the given root directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            layout: DirectoryLayout::new(root),
        }
    }

    /// The directory layout.
    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    /// Delete every checkpoint folder lacking its `completed.dat` marker.
    ///
    /// Safe against concurrent creators: a folder only gains its marker after
    /// every other artifact has been fsynced, and a marker-less folder is
    /// owned exclusively by a dead writer. Folders that cannot be deleted
    /// (read-only filesystems) are skipped; they are never selected anyway.
    ///
    /// Returns the number of folders removed.
    pub fn prune_incomplete(&self) -> io::Result<usize> {
        let mut removed = 0;
        for root in [
            self.layout.index_checkpoint_root(),
            self.layout.log_checkpoint_root(),
        ] {
            removed += prune_root(&root)?;
        }
        Ok(removed)
    }

    /// The token with the newest completion marker for `kind`.
    pub fn latest_token(&self, kind: CheckpointKind) -> Result<CheckpointToken, RecoveryError> {
        let candidates = match kind {
            CheckpointKind::IndexOnly => completed_tokens(&self.layout.index_checkpoint_root())?,
            CheckpointKind::HybridLogOnly => completed_tokens(&self.layout.log_checkpoint_root())?,
            CheckpointKind::Full => {
                let index = completed_tokens(&self.layout.index_checkpoint_root())?;
                completed_tokens(&self.layout.log_checkpoint_root())?
                    .into_iter()
                    .filter(|(token, _)| index.iter().any(|(t, _)| t == token))
                    .collect()
            }
        };

        candidates
            .into_iter()
            .max_by_key(|(_, mtime)| *mtime)
            .map(|(token, _)| token)
            .ok_or(RecoveryError::NoCheckpoint)
    }

    /// Whether `token` has a completion marker for `kind`.
    pub fn is_safe(&self, token: CheckpointToken, kind: CheckpointKind) -> bool {
        let index_safe =
            || completed_marker_path(&self.layout.index_checkpoint_dir(token)).exists();
        let log_safe = || completed_marker_path(&self.layout.log_checkpoint_dir(token)).exists();

        match kind {
            CheckpointKind::IndexOnly => index_safe(),
            CheckpointKind::HybridLogOnly => log_safe(),
            CheckpointKind::Full => index_safe() && log_safe(),
        }
    }

    /// Load the metadata of an index checkpoint.
    pub fn load_index_info(
        &self,
        token: CheckpointToken,
    ) -> Result<IndexCheckpointInfo, RecoveryError> {
        let dir = self.layout.index_checkpoint_dir(token);
        if !completed_marker_path(&dir).exists() {
            return Err(RecoveryError::MissingMarker { token });
        }
        IndexCheckpointInfo::read_from_file(&info_path(&dir))
            .map_err(|e| classify_load_error(token, e))
    }

    /// Load the metadata of a hybrid-log checkpoint.
    pub fn load_log_info(
        &self,
        token: CheckpointToken,
    ) -> Result<HybridLogCheckpointInfo, RecoveryError> {
        let dir = self.layout.log_checkpoint_dir(token);
        if !completed_marker_path(&dir).exists() {
            return Err(RecoveryError::MissingMarker { token });
        }
        HybridLogCheckpointInfo::read_from_file(&info_path(&dir))
            .map_err(|e| classify_load_error(token, e))
    }

    /// An index checkpoint is compatible with a log checkpoint iff its
    /// cut-point does not run past the log checkpoint's tail.
    pub fn is_compatible(
        index_info: &IndexCheckpointInfo,
        log_info: &HybridLogCheckpointInfo,
    ) -> bool {
        index_info.checkpoint_start_address <= log_info.final_address
    }

    // --- checkpoint creation ---

    /// Create (and return) the folder for a new index checkpoint.
    pub fn create_index_checkpoint_dir(&self, token: CheckpointToken) -> io::Result<PathBuf> {
        let dir = self.layout.index_checkpoint_dir(token);
        create_checkpoint_directory(&dir)?;
        Ok(dir)
    }

    /// Create (and return) the folder for a new hybrid-log checkpoint.
    pub fn create_log_checkpoint_dir(&self, token: CheckpointToken) -> io::Result<PathBuf> {
        let dir = self.layout.log_checkpoint_dir(token);
        create_checkpoint_directory(&dir)?;
        Ok(dir)
    }

    /// Finalize an index checkpoint: write `info.dat`, then the marker.
    /// Every other artifact must already be synced.
    pub fn commit_index_checkpoint(&self, info: &IndexCheckpointInfo) -> io::Result<()> {
        let dir = self.layout.index_checkpoint_dir(info.token);
        info.write_to_file(&info_path(&dir))?;
        write_completed_marker(&dir)
    }

    /// Finalize a hybrid-log checkpoint: write `info.dat`, then the marker.
    pub fn commit_log_checkpoint(&self, info: &HybridLogCheckpointInfo) -> io::Result<()> {
        let dir = self.layout.log_checkpoint_dir(info.token);
        info.write_to_file(&info_path(&dir))?;
        write_completed_marker(&dir)
    }
}

fn classify_load_error(token: Uuid, err: io::Error) -> RecoveryError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::NotFound => RecoveryError::corrupt(token, err),
        _ => RecoveryError::Io(err),
    }
}

fn checkpoint_dirs(root: &Path) -> io::Result<Vec<(Uuid, PathBuf)>> {
    let mut dirs = Vec::new();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Ok(token) = Uuid::parse_str(name) {
                dirs.push((token, path));
            }
        }
    }
    Ok(dirs)
}

fn completed_tokens(root: &Path) -> Result<Vec<(Uuid, SystemTime)>, RecoveryError> {
    let mut tokens = Vec::new();
    for (token, path) in checkpoint_dirs(root)? {
        let marker = completed_marker_path(&path);
        if let Ok(meta) = fs::metadata(&marker) {
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            tokens.push((token, mtime));
        }
    }
    Ok(tokens)
}

fn prune_root(root: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for (token, path) in checkpoint_dirs(root)? {
        if completed_marker_path(&path).exists() {
            continue;
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(token = %token, error = %e, "could not prune incomplete checkpoint");
            }
        }
    }
    Ok(removed)
}
