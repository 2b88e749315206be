//! Memory-mapped partition files
//!
//! One partition file is a growable flat byte array holding fixed-size blocks.
//! Writes land at offsets handed out by the partition index; when a write
//! would run past the mapped length the file is truncated up by the growth
//! delta and remapped inside the same critical section, so readers can never
//! observe a stale mapping. Blocks are never freed or compacted.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::index::ObjectBlock;
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug)]
struct MappedFile {
    file: File,
    mmap: MmapMut,
}

/// A single partition's data file, opened via memory mapping.
///
/// The map is guarded by a read/write lock: `write_at` (and any grow-and-remap
/// it triggers) takes it exclusively, `read_blocks` takes it shared.
#[derive(Debug)]
pub struct PartitionFile {
    path: PathBuf,
    growth_delta: u64,
    inner: RwLock<MappedFile>,
}

impl PartitionFile {
    /// Open a partition file, creating it zero-filled at `initial_size` if it
    /// does not exist yet.
    pub fn open(path: impl AsRef<Path>, initial_size: u64, growth_delta: u64) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        // A fresh (or previously empty) file cannot be mapped at length zero.
        if file.metadata()?.len() == 0 {
            file.set_len(initial_size.max(1))?;
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            path,
            growth_delta: growth_delta.max(1),
            inner: RwLock::new(MappedFile { file, mmap }),
        })
    }

    /// Copy `data` into the mapping at `offset`, growing the file first if
    /// `offset + data.len()` exceeds the current mapped length.
    pub fn write_at(&self, data: &[u8], offset: u64) -> StorageResult<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StorageError::CorruptData("partition file lock poisoned".to_string()))?;

        let end = offset as usize + data.len();

        if end > inner.mmap.len() {
            let mut new_len = inner.mmap.len() as u64;
            while (new_len as usize) < end {
                new_len += self.growth_delta;
            }

            inner.file.set_len(new_len)?;
            inner.mmap = unsafe { MmapMut::map_mut(&inner.file)? };

            tracing::debug!(path = ?self.path, new_len, "grew partition file");
        }

        inner.mmap[offset as usize..end].copy_from_slice(data);

        Ok(())
    }

    /// Reassemble an object's byte stream from its block chain, in chain
    /// order, excluding the unused tail of each block.
    pub fn read_blocks(&self, blocks: &[ObjectBlock], block_size: u32) -> StorageResult<Vec<u8>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StorageError::CorruptData("partition file lock poisoned".to_string()))?;

        let mut data = Vec::with_capacity(blocks.len() * block_size as usize);

        for block in blocks {
            let live = (block_size - block.remaining_capacity) as usize;
            let start = block.offset as usize;
            let end = start + live;

            if end > inner.mmap.len() {
                return Err(StorageError::CorruptData(format!(
                    "block at offset {} runs past end of {:?}",
                    block.offset, self.path
                )));
            }

            data.extend_from_slice(&inner.mmap[start..end]);
        }

        Ok(data)
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> StorageResult<()> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StorageError::CorruptData("partition file lock poisoned".to_string()))?;
        inner.mmap.flush()?;
        Ok(())
    }

    /// Current mapped length in bytes.
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.mmap.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
