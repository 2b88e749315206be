//! Per-partition block-chain index
//!
//! Tracks, for one partition file, the next free block offset and each
//! object's ordered chain of blocks. Chains are append-only: blocks are
//! handed out monotonically and never reused, so chain order is insertion
//! order is time order.
//!
//! On-disk format (`index_<partition>.bin`):
//! - magic: `b"MIDX"` (4 bytes)
//! - version: u16, little-endian
//! - crc: u32, little-endian, CRC32 of the body
//! - body: bincode-serialized [`IndexState`]
//!
//! The index is loaded fully into memory on first access and written back by
//! a periodic sync (skip-if-clean via a dirty flag) and on close.

use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockWriteGuard};

const INDEX_MAGIC: [u8; 4] = *b"MIDX";
const INDEX_VERSION: u16 = 1;
const INDEX_HEADER_SIZE: usize = 10;

/// One fixed-size allocation unit inside a partition file, owned by exactly
/// one object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectBlock {
    /// Byte offset into the partition file
    pub offset: u64,
    /// Bytes still unused at the tail of this block
    pub remaining_capacity: u32,
}

/// The serializable index contents.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct IndexState {
    block_size: u32,
    next_free_block_offset: u64,
    objects: HashMap<u32, Vec<ObjectBlock>>,
}

/// In-memory index for one partition, backed by one file on disk.
#[derive(Debug)]
pub struct PartitionIndex {
    path: PathBuf,
    block_size: u32,
    state: RwLock<IndexState>,
    dirty: AtomicBool,
}

impl PartitionIndex {
    /// Create a fresh, empty index and write its file immediately.
    pub fn create(path: impl AsRef<Path>, block_size: u32) -> StorageResult<Self> {
        let index = Self {
            path: path.as_ref().to_path_buf(),
            block_size,
            state: RwLock::new(IndexState {
                block_size,
                ..Default::default()
            }),
            dirty: AtomicBool::new(true),
        };
        index.sync()?;
        Ok(index)
    }

    /// Load an existing index file, verifying magic, version and checksum.
    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = std::fs::read(&path)?;

        if bytes.len() < INDEX_HEADER_SIZE {
            return Err(StorageError::CorruptData(format!(
                "index file {:?} shorter than header",
                path
            )));
        }

        if bytes[0..4] != INDEX_MAGIC {
            return Err(StorageError::CorruptData(format!(
                "bad magic in index file {:?}",
                path
            )));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version > INDEX_VERSION {
            return Err(StorageError::CorruptData(format!(
                "unsupported index version {} in {:?}",
                version, path
            )));
        }

        let stored_crc = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        let body = &bytes[INDEX_HEADER_SIZE..];
        let computed_crc = crc32fast::hash(body);
        if stored_crc != computed_crc {
            return Err(StorageError::CorruptData(format!(
                "index checksum mismatch in {:?}: stored={}, computed={}",
                path, stored_crc, computed_crc
            )));
        }

        let state: IndexState = bincode::deserialize(body)?;
        let block_size = state.block_size;

        Ok(Self {
            path,
            block_size,
            state: RwLock::new(state),
            dirty: AtomicBool::new(false),
        })
    }

    /// Block size this index allocates in.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// The object's block chain, or `None` if the object was never written
    /// in this partition.
    pub fn object_blocks(&self, object_id: u32) -> Option<Vec<ObjectBlock>> {
        let state = self.state.read().ok()?;
        state.objects.get(&object_id).cloned()
    }

    /// Every object id ever written to this partition.
    pub fn object_ids(&self) -> Vec<u32> {
        self.state
            .read()
            .map(|s| s.objects.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Take the exclusive write guard used by the engine's put path. Holding
    /// it across a whole multi-block write serializes concurrent writers
    /// touching the same object.
    pub fn begin_write(&self) -> StorageResult<IndexWriteGuard<'_>> {
        let state = self
            .state
            .write()
            .map_err(|_| StorageError::CorruptData("index lock poisoned".to_string()))?;
        Ok(IndexWriteGuard {
            state,
            block_size: self.block_size,
            dirty: &self.dirty,
        })
    }

    /// Serialize the index to its file if it changed since the last sync.
    /// Returns whether a write happened.
    pub fn sync(&self) -> StorageResult<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        let body = {
            let state = self
                .state
                .read()
                .map_err(|_| StorageError::CorruptData("index lock poisoned".to_string()))?;
            bincode::serialize(&*state)?
        };

        let mut bytes = Vec::with_capacity(INDEX_HEADER_SIZE + body.len());
        bytes.extend_from_slice(&INDEX_MAGIC);
        bytes.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        bytes.extend_from_slice(&body);

        if let Err(e) = std::fs::write(&self.path, &bytes) {
            // Keep the dirty flag so the next sync retries.
            self.dirty.store(true, Ordering::Release);
            return Err(e.into());
        }

        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Exclusive mutation handle over one partition index, held by a writer for
/// the duration of one object write.
pub struct IndexWriteGuard<'a> {
    state: RwLockWriteGuard<'a, IndexState>,
    block_size: u32,
    dirty: &'a AtomicBool,
}

impl IndexWriteGuard<'_> {
    /// The last block of the object's chain, if any.
    pub fn last_block(&self, object_id: u32) -> Option<ObjectBlock> {
        self.state
            .objects
            .get(&object_id)
            .and_then(|chain| chain.last())
            .copied()
    }

    /// Allocate a fresh block at the next free offset and append it to the
    /// object's chain. Offsets advance monotonically and are never reused.
    pub fn append_new_block(&mut self, object_id: u32) -> ObjectBlock {
        let offset = self.state.next_free_block_offset;
        self.state.next_free_block_offset += u64::from(self.block_size);

        let block = ObjectBlock {
            offset,
            remaining_capacity: self.block_size,
        };
        self.state.objects.entry(object_id).or_default().push(block);
        self.dirty.store(true, Ordering::Release);
        block
    }

    /// Update the remaining capacity of the object's last block.
    pub fn set_last_block_capacity(&mut self, object_id: u32, remaining_capacity: u32) {
        if let Some(block) = self
            .state
            .objects
            .get_mut(&object_id)
            .and_then(|chain| chain.last_mut())
        {
            block.remaining_capacity = remaining_capacity;
            self.dirty.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_monotonic_block_allocation() {
        let dir = tempdir().unwrap();
        let index = PartitionIndex::create(dir.path().join("index_0.bin"), 120).unwrap();

        let mut guard = index.begin_write().unwrap();
        let b0 = guard.append_new_block(1);
        let b1 = guard.append_new_block(2);
        let b2 = guard.append_new_block(1);
        drop(guard);

        assert_eq!(b0.offset, 0);
        assert_eq!(b1.offset, 120);
        assert_eq!(b2.offset, 240);

        let chain = index.object_blocks(1).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].offset, 0);
        assert_eq!(chain[1].offset, 240);
    }

    #[test]
    fn test_absent_object_has_no_chain() {
        let dir = tempdir().unwrap();
        let index = PartitionIndex::create(dir.path().join("index_0.bin"), 120).unwrap();
        assert!(index.object_blocks(42).is_none());
        assert!(index.object_ids().is_empty());
    }

    #[test]
    fn test_capacity_update() {
        let dir = tempdir().unwrap();
        let index = PartitionIndex::create(dir.path().join("index_0.bin"), 120).unwrap();

        let mut guard = index.begin_write().unwrap();
        guard.append_new_block(7);
        guard.set_last_block_capacity(7, 20);
        drop(guard);

        let chain = index.object_blocks(7).unwrap();
        assert_eq!(chain[0].remaining_capacity, 20);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index_0.bin");

        {
            let index = PartitionIndex::create(&path, 120).unwrap();
            let mut guard = index.begin_write().unwrap();
            guard.append_new_block(5);
            guard.set_last_block_capacity(5, 100);
            guard.append_new_block(9);
            drop(guard);
            index.sync().unwrap();
        }

        let index = PartitionIndex::load(&path).unwrap();
        assert_eq!(index.block_size(), 120);

        let chain = index.object_blocks(5).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].remaining_capacity, 100);

        let mut ids = index.object_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![5, 9]);
    }

    #[test]
    fn test_sync_skips_when_clean() {
        let dir = tempdir().unwrap();
        let index = PartitionIndex::create(dir.path().join("index_0.bin"), 120).unwrap();

        // create() already synced; nothing changed since
        assert!(!index.sync().unwrap());

        let mut guard = index.begin_write().unwrap();
        guard.append_new_block(1);
        drop(guard);

        assert!(index.sync().unwrap());
        assert!(!index.sync().unwrap());
    }

    #[test]
    fn test_corrupt_checksum_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index_0.bin");

        {
            let index = PartitionIndex::create(&path, 120).unwrap();
            let mut guard = index.begin_write().unwrap();
            guard.append_new_block(1);
            drop(guard);
            index.sync().unwrap();
        }

        // Flip a byte in the body
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = PartitionIndex::load(&path).unwrap_err();
        assert!(matches!(err, StorageError::CorruptData(_)));
    }

    #[test]
    fn test_bad_magic_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index_0.bin");
        std::fs::write(&path, b"NOTANINDEXFILE").unwrap();

        let err = PartitionIndex::load(&path).unwrap_err();
        assert!(matches!(err, StorageError::CorruptData(_)));
    }
}
