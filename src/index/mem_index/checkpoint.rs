//! Hash index checkpoint write/restore.
//!
//! The bucket array is dumped as raw little-endian words into a set of
//! `ht.<n>.dat` chunk files: each bucket is 7 entry words plus its overflow
//! link. Overflow links are pool indices, so chains round-trip without any
//! pointer fix-up. Overflow pool buckets are appended after the main buckets
//! of the final chunk; their count travels in the checkpoint metadata.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::Ordering;

use crate::checkpoint::layout::hash_table_chunk_path;
use crate::checkpoint::IndexCheckpointInfo;
use crate::index::{HashBucket, HashBucketEntry, HashBucketOverflowEntry};
use crate::utility::is_power_of_two;

use super::MemHashIndex;

/// What the index wrote, for the caller to fold into checkpoint metadata.
#[derive(Debug, Clone, Copy)]
pub struct IndexCheckpointStats {
    /// Number of `ht.<n>.dat` chunk files written.
    pub num_chunks: u32,
    /// Number of overflow buckets appended to the last chunk.
    pub num_overflow_buckets: u64,
    /// Number of used entries at capture time.
    pub num_entries: u64,
}

fn write_bucket(writer: &mut impl Write, bucket: &HashBucket) -> io::Result<()> {
    for slot in &bucket.entries {
        let entry = slot.load(Ordering::Relaxed);
        writer.write_all(&entry.control().to_le_bytes())?;
    }
    let overflow = bucket.overflow_entry.load(Ordering::Relaxed);
    writer.write_all(&overflow.control().to_le_bytes())?;
    Ok(())
}

fn read_bucket(reader: &mut impl Read, bucket: &HashBucket) -> io::Result<()> {
    let mut word = [0u8; 8];
    for slot in &bucket.entries {
        reader.read_exact(&mut word)?;
        slot.store(
            HashBucketEntry::from_control(u64::from_le_bytes(word)),
            Ordering::Release,
        );
    }
    reader.read_exact(&mut word)?;
    bucket.overflow_entry.store(
        HashBucketOverflowEntry::from_control(u64::from_le_bytes(word)),
        Ordering::Release,
    );
    Ok(())
}

impl MemHashIndex {
    /// Write the bucket array into `num_chunks` `ht.<n>.dat` files under
    /// `dir`. `num_chunks` must divide the table size.
    pub fn write_checkpoint(&self, dir: &Path, num_chunks: u32) -> io::Result<IndexCheckpointStats> {
        let table_size = self.table().size();
        if table_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "hash index not initialized",
            ));
        }
        let num_chunks = (num_chunks as u64).min(table_size) as u32;
        debug_assert!(table_size % num_chunks as u64 == 0);
        let buckets_per_chunk = table_size / num_chunks as u64;

        let mut num_overflow_buckets = 0u64;
        for chunk in 0..num_chunks {
            let file = File::create(hash_table_chunk_path(dir, chunk))?;
            let mut writer = BufWriter::with_capacity(1 << 20, file);

            let start = chunk as u64 * buckets_per_chunk;
            for idx in start..start + buckets_per_chunk {
                write_bucket(&mut writer, self.table().bucket_at(idx))?;
            }

            // Overflow pool rides in the tail of the final chunk.
            if chunk == num_chunks - 1 {
                num_overflow_buckets = self.with_overflow_pool(|pool| {
                    for bucket in pool.iter() {
                        write_bucket(&mut writer, bucket)?;
                    }
                    Ok::<_, io::Error>(pool.len() as u64)
                })?;
            }

            writer.flush()?;
            writer.into_inner()?.sync_all()?;
        }

        Ok(IndexCheckpointStats {
            num_chunks,
            num_overflow_buckets,
            num_entries: self.num_entries(),
        })
    }

    /// Restore the bucket array from the chunk files described by `info`.
    ///
    /// The restored index is fuzzy: the snapshot was taken without quiescing
    /// writers, so tentative entries are swept here and bucket addresses may
    /// run past the index checkpoint's cut-point (never past the compatible
    /// log checkpoint's tail). Log replay brings the buckets up to date.
    pub fn recover(&mut self, dir: &Path, info: &IndexCheckpointInfo) -> io::Result<()> {
        if !is_power_of_two(info.table_size)
            || info.num_chunks == 0
            || info.table_size % info.num_chunks as u64 != 0
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "bad index checkpoint geometry: table_size={}, num_chunks={}",
                    info.table_size, info.num_chunks
                ),
            ));
        }
        self.initialize(info.table_size);

        let buckets_per_chunk = info.table_size / info.num_chunks as u64;
        for chunk in 0..info.num_chunks {
            let file = File::open(hash_table_chunk_path(dir, chunk))?;
            let mut reader = BufReader::with_capacity(1 << 20, file);

            let start = chunk as u64 * buckets_per_chunk;
            for idx in start..start + buckets_per_chunk {
                read_bucket(&mut reader, self.table().bucket_at(idx))?;
            }

            if chunk == info.num_chunks - 1 {
                self.with_overflow_pool(|pool| {
                    for _ in 0..info.num_overflow_buckets {
                        let bucket = Box::new(HashBucket::new());
                        read_bucket(&mut reader, &bucket)?;
                        pool.push(bucket);
                    }
                    Ok::<_, io::Error>(())
                })?;
            }
        }

        self.clear_tentative_entries();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::index::KeyHash;
    use uuid::Uuid;

    fn sample_info(table_size: u64, stats: IndexCheckpointStats) -> IndexCheckpointInfo {
        IndexCheckpointInfo {
            token: Uuid::new_v4(),
            version: 1,
            table_size,
            num_chunks: stats.num_chunks,
            num_overflow_buckets: stats.num_overflow_buckets,
            num_entries: stats.num_entries,
            log_begin_address: Address::FIRST_VALID,
            checkpoint_start_address: Address::FIRST_VALID,
        }
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();

        let mut index = MemHashIndex::new();
        index.initialize(64);

        let mut hashes = Vec::new();
        for i in 0u64..100 {
            let key = format!("key-{i}");
            let hash = KeyHash::from_key(key.as_bytes());
            let handle = index.find_or_create_tag(hash, Address::INVALID);
            index.install(
                &handle,
                HashBucketEntry::new(Address::from_control(64 + i * 32), hash.tag()),
            );
            hashes.push((hash, 64 + i * 32));
        }

        let stats = index.write_checkpoint(dir.path(), 8).unwrap();
        assert_eq!(stats.num_chunks, 8);

        let mut restored = MemHashIndex::new();
        restored
            .recover(dir.path(), &sample_info(64, stats))
            .unwrap();

        assert_eq!(restored.num_entries(), index.num_entries());
        for (hash, control) in hashes {
            let found = restored.find_tag(hash).expect("entry survives restore");
            assert_eq!(found.entry.address().control(), control);
        }
    }

    #[test]
    fn test_checkpoint_roundtrip_with_overflow() {
        let dir = tempfile::tempdir().unwrap();

        // Single-bucket table: collisions force overflow buckets.
        let mut index = MemHashIndex::new();
        index.initialize(1);

        let mut tags = Vec::new();
        let mut i = 0u64;
        while tags.len() < 15 {
            let hash = KeyHash::new(i.wrapping_mul(0x9e3779b97f4a7c15));
            i += 1;
            if tags.iter().any(|&(t, _)| t == hash.tag()) {
                continue;
            }
            let handle = index.find_or_create_tag(hash, Address::INVALID);
            index.install(
                &handle,
                HashBucketEntry::new(Address::from_control(64 + i), hash.tag()),
            );
            tags.push((hash.tag(), hash));
        }
        assert!(index.num_overflow_buckets() > 0);

        let stats = index.write_checkpoint(dir.path(), 8).unwrap();
        assert_eq!(stats.num_chunks, 1);
        assert_eq!(stats.num_overflow_buckets, index.num_overflow_buckets() as u64);

        let mut restored = MemHashIndex::new();
        restored
            .recover(dir.path(), &sample_info(1, stats))
            .unwrap();

        for (_, hash) in tags {
            assert!(restored.find_tag(hash).is_some());
        }
    }

    #[test]
    fn test_recover_missing_chunk_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = MemHashIndex::new();

        let info = IndexCheckpointInfo {
            token: Uuid::new_v4(),
            version: 1,
            table_size: 64,
            num_chunks: 8,
            num_overflow_buckets: 0,
            num_entries: 0,
            log_begin_address: Address::FIRST_VALID,
            checkpoint_start_address: Address::FIRST_VALID,
        };
        assert!(index.recover(dir.path(), &info).is_err());
    }
}
