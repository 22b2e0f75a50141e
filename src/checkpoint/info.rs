//! Checkpoint metadata structures and their on-disk serialization.
//!
//! Metadata is stored as JSON in each checkpoint's `info.dat`, via mirror
//! structs that keep tokens as strings and addresses as raw u64 words.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;
use crate::checkpoint::CheckpointToken;

/// A session's resume point captured at checkpoint time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionResumePoint {
    /// Session identifier.
    pub guid: Uuid,
    /// The log position through which this session's operations are covered
    /// by the checkpoint.
    pub resume_address: Address,
}

/// Metadata of an index checkpoint.
#[derive(Debug, Clone)]
pub struct IndexCheckpointInfo {
    /// Checkpoint token.
    pub token: CheckpointToken,
    /// Store version (epoch) at capture time.
    pub version: u32,
    /// Hash table size in buckets.
    pub table_size: u64,
    /// Number of `ht.<n>.dat` chunk files.
    pub num_chunks: u32,
    /// Number of overflow buckets appended to the last chunk.
    pub num_overflow_buckets: u64,
    /// Number of used entries at capture time.
    pub num_entries: u64,
    /// The log's begin address at capture time.
    pub log_begin_address: Address,
    /// The log cut-point at which the index snapshot began. Buckets may point
    /// past it (the snapshot is fuzzy) but replay starts here.
    pub checkpoint_start_address: Address,
}

/// Metadata of a hybrid-log checkpoint.
#[derive(Debug, Clone)]
pub struct HybridLogCheckpointInfo {
    /// Checkpoint token.
    pub token: CheckpointToken,
    /// Store version (epoch) of the checkpoint: records stamped `> version`
    /// are in-flight spill-over and get invalidated during replay.
    pub version: u32,
    /// Whether log data lives in a `snapshot.dat` file (vs fold-over onto the
    /// main log device).
    pub use_snapshot_file: bool,
    /// First valid address of the log.
    pub begin_address: Address,
    /// Fuzzy-region lower bound captured when the checkpoint started.
    pub start_logical_address: Address,
    /// Everything below this address was durable on the main log when the
    /// checkpoint started; in snapshot mode the snapshot file begins at this
    /// page.
    pub flushed_address: Address,
    /// The log's tail at checkpoint time; recovery replays up to here.
    pub final_address: Address,
    /// Per-segment offsets into the accompanying object log, if present.
    pub object_log_segment_offsets: Vec<u64>,
    /// Per-session resume points.
    pub continue_tokens: Vec<SessionResumePoint>,
}

impl HybridLogCheckpointInfo {
    /// Look up the resume point for one session.
    pub fn continue_token(&self, guid: &Uuid) -> Option<Address> {
        self.continue_tokens
            .iter()
            .find(|s| &s.guid == guid)
            .map(|s| s.resume_address)
    }
}

// ============ serializable mirrors ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SerializableResumePoint {
    guid: String,
    resume_address: u64,
}

/// Serializable version of [`IndexCheckpointInfo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableIndexInfo {
    /// Checkpoint token (UUID as string).
    pub token: String,
    /// Store version at capture time.
    pub version: u32,
    /// Hash table size in buckets.
    pub table_size: u64,
    /// Number of chunk files.
    pub num_chunks: u32,
    /// Number of overflow buckets.
    #[serde(default)]
    pub num_overflow_buckets: u64,
    /// Number of used entries.
    #[serde(default)]
    pub num_entries: u64,
    /// Log begin address (raw).
    #[serde(default)]
    pub log_begin_address: u64,
    /// Snapshot cut-point (raw).
    pub checkpoint_start_address: u64,
}

impl SerializableIndexInfo {
    fn from_info(info: &IndexCheckpointInfo) -> Self {
        Self {
            token: info.token.to_string(),
            version: info.version,
            table_size: info.table_size,
            num_chunks: info.num_chunks,
            num_overflow_buckets: info.num_overflow_buckets,
            num_entries: info.num_entries,
            log_begin_address: info.log_begin_address.control(),
            checkpoint_start_address: info.checkpoint_start_address.control(),
        }
    }

    fn to_info(&self) -> io::Result<IndexCheckpointInfo> {
        let token = self.token.parse().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("invalid token: {e}"))
        })?;

        Ok(IndexCheckpointInfo {
            token,
            version: self.version,
            table_size: self.table_size,
            num_chunks: self.num_chunks,
            num_overflow_buckets: self.num_overflow_buckets,
            num_entries: self.num_entries,
            log_begin_address: Address::from_control(self.log_begin_address),
            checkpoint_start_address: Address::from_control(self.checkpoint_start_address),
        })
    }
}

/// Serializable version of [`HybridLogCheckpointInfo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableLogInfo {
    /// Checkpoint token (UUID as string).
    pub token: String,
    /// Store version of the checkpoint.
    pub version: u32,
    /// Whether log data lives in a snapshot file.
    #[serde(default)]
    pub use_snapshot_file: bool,
    /// Log begin address (raw).
    #[serde(default)]
    pub begin_address: u64,
    /// Fuzzy-region lower bound (raw).
    pub start_logical_address: u64,
    /// Durable boundary at checkpoint start (raw).
    pub flushed_address: u64,
    /// Log tail at checkpoint time (raw).
    pub final_address: u64,
    /// Object-log segment offsets.
    #[serde(default)]
    pub object_log_segment_offsets: Vec<u64>,
    /// Per-session resume points.
    #[serde(default)]
    pub(crate) continue_tokens: Vec<SerializableResumePoint>,
}

impl SerializableLogInfo {
    fn from_info(info: &HybridLogCheckpointInfo) -> Self {
        Self {
            token: info.token.to_string(),
            version: info.version,
            use_snapshot_file: info.use_snapshot_file,
            begin_address: info.begin_address.control(),
            start_logical_address: info.start_logical_address.control(),
            flushed_address: info.flushed_address.control(),
            final_address: info.final_address.control(),
            object_log_segment_offsets: info.object_log_segment_offsets.clone(),
            continue_tokens: info
                .continue_tokens
                .iter()
                .map(|s| SerializableResumePoint {
                    guid: s.guid.to_string(),
                    resume_address: s.resume_address.control(),
                })
                .collect(),
        }
    }

    fn to_info(&self) -> io::Result<HybridLogCheckpointInfo> {
        let token = self.token.parse().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("invalid token: {e}"))
        })?;

        let continue_tokens = self
            .continue_tokens
            .iter()
            .map(|s| {
                let guid = s.guid.parse().map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid session guid: {e}"),
                    )
                })?;
                Ok(SessionResumePoint {
                    guid,
                    resume_address: Address::from_control(s.resume_address),
                })
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(HybridLogCheckpointInfo {
            token,
            version: self.version,
            use_snapshot_file: self.use_snapshot_file,
            begin_address: Address::from_control(self.begin_address),
            start_logical_address: Address::from_control(self.start_logical_address),
            flushed_address: Address::from_control(self.flushed_address),
            final_address: Address::from_control(self.final_address),
            object_log_segment_offsets: self.object_log_segment_offsets.clone(),
            continue_tokens,
        })
    }
}

// ============ file I/O ============

fn write_json(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(data)?;
    file.flush()?;
    file.into_inner()?.sync_all()
}

fn read_all(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = BufReader::new(File::open(path)?);
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    Ok(data)
}

impl IndexCheckpointInfo {
    /// Serialize to JSON bytes.
    pub fn serialize_json(&self) -> io::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&SerializableIndexInfo::from_info(self))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Deserialize from JSON bytes.
    pub fn deserialize_json(data: &[u8]) -> io::Result<Self> {
        let mirror: SerializableIndexInfo = serde_json::from_slice(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        mirror.to_info()
    }

    /// Write to `path`, fsyncing the file.
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        write_json(path, &self.serialize_json()?)
    }

    /// Read from `path`.
    pub fn read_from_file(path: &Path) -> io::Result<Self> {
        Self::deserialize_json(&read_all(path)?)
    }
}

impl HybridLogCheckpointInfo {
    /// Serialize to JSON bytes.
    pub fn serialize_json(&self) -> io::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&SerializableLogInfo::from_info(self))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Deserialize from JSON bytes.
    pub fn deserialize_json(data: &[u8]) -> io::Result<Self> {
        let mirror: SerializableLogInfo = serde_json::from_slice(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        mirror.to_info()
    }

    /// Write to `path`, fsyncing the file.
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        write_json(path, &self.serialize_json()?)
    }

    /// Read from `path`.
    pub fn read_from_file(path: &Path) -> io::Result<Self> {
        Self::deserialize_json(&read_all(path)?)
    }
}

/// Write the empty `completed.dat` marker, fsyncing it. Callers must have
/// fsynced every other artifact first: the marker's existence is what makes
/// the folder usable.
pub fn write_completed_marker(checkpoint_dir: &Path) -> io::Result<()> {
    let path = super::layout::completed_marker_path(checkpoint_dir);
    let file = File::create(path)?;
    file.sync_all()?;
    // Make the new directory entry durable as well, where the platform
    // supports opening directories.
    if let Ok(dir) = File::open(checkpoint_dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Create a checkpoint directory (and parents).
pub fn create_checkpoint_directory(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log_info() -> HybridLogCheckpointInfo {
        HybridLogCheckpointInfo {
            token: Uuid::new_v4(),
            version: 3,
            use_snapshot_file: true,
            begin_address: Address::FIRST_VALID,
            start_logical_address: Address::from_control(2048),
            flushed_address: Address::from_control(2048),
            final_address: Address::from_control(5120),
            object_log_segment_offsets: vec![0, 512],
            continue_tokens: vec![SessionResumePoint {
                guid: Uuid::new_v4(),
                resume_address: Address::from_control(4096),
            }],
        }
    }

    #[test]
    fn test_index_info_json_roundtrip() {
        let info = IndexCheckpointInfo {
            token: Uuid::new_v4(),
            version: 2,
            table_size: 1024,
            num_chunks: 8,
            num_overflow_buckets: 3,
            num_entries: 500,
            log_begin_address: Address::FIRST_VALID,
            checkpoint_start_address: Address::from_control(10_000),
        };

        let json = info.serialize_json().unwrap();
        let restored = IndexCheckpointInfo::deserialize_json(&json).unwrap();

        assert_eq!(restored.token, info.token);
        assert_eq!(restored.table_size, 1024);
        assert_eq!(restored.num_chunks, 8);
        assert_eq!(restored.num_overflow_buckets, 3);
        assert_eq!(
            restored.checkpoint_start_address,
            info.checkpoint_start_address
        );
    }

    #[test]
    fn test_log_info_json_roundtrip() {
        let info = sample_log_info();
        let json = info.serialize_json().unwrap();
        let restored = HybridLogCheckpointInfo::deserialize_json(&json).unwrap();

        assert_eq!(restored.token, info.token);
        assert_eq!(restored.version, 3);
        assert!(restored.use_snapshot_file);
        assert_eq!(restored.final_address, info.final_address);
        assert_eq!(restored.object_log_segment_offsets, vec![0, 512]);
        assert_eq!(restored.continue_tokens.len(), 1);
        assert_eq!(
            restored.continue_token(&info.continue_tokens[0].guid),
            Some(Address::from_control(4096))
        );
    }

    #[test]
    fn test_log_info_file_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("info.dat");

        let info = sample_log_info();
        info.write_to_file(&path).unwrap();
        let restored = HybridLogCheckpointInfo::read_from_file(&path).unwrap();

        assert_eq!(restored.token, info.token);
        assert_eq!(restored.flushed_address, info.flushed_address);
    }

    #[test]
    fn test_deserialize_garbage_fails() {
        assert!(IndexCheckpointInfo::deserialize_json(b"not json").is_err());
        assert!(HybridLogCheckpointInfo::deserialize_json(b"{\"token\":\"zzz\"}").is_err());
    }

    #[test]
    fn test_completed_marker() {
        let dir = tempfile::tempdir().unwrap();
        write_completed_marker(dir.path()).unwrap();
        assert!(dir.path().join("completed.dat").exists());
    }
}
