//! Per-key storage engine
//!
//! One `StorageEngine` is the on-disk store for a single `(date, counter)`
//! key. It shards objects across `partition_count` partition files by
//! `object_id % partition_count` and composes one block allocator and one
//! index per partition. The byte payloads it stores are opaque here; the
//! codec above it decides their meaning.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::index::PartitionIndex;
use crate::storage::partition::PartitionFile;
use std::path::{Path, PathBuf};

/// Sizing knobs for a storage engine, taken from the storage config.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Number of partition files; fixed for the lifetime of a data directory
    pub partition_count: u32,
    /// Fixed block allocation unit in bytes
    pub block_size: u32,
    /// Size partition files are created at
    pub initial_file_size: u64,
    /// Amount a partition file grows by when a write runs past its end
    pub file_growth_delta: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            partition_count: 5,
            block_size: 120,
            initial_file_size: 40_960,
            file_growth_delta: 40_960,
        }
    }
}

#[derive(Debug)]
struct Partition {
    file: PartitionFile,
    index: PartitionIndex,
}

/// The storage for one `(date, counter)` key: `partition_count` data files
/// plus their indexes under one directory.
#[derive(Debug)]
pub struct StorageEngine {
    path: PathBuf,
    options: EngineOptions,
    partitions: Vec<Partition>,
}

impl StorageEngine {
    /// Open the engine rooted at `path`.
    ///
    /// If the directory is absent and `create_if_missing` is false this fails
    /// with `StorageDoesNotExist` — the normal outcome for a day that was
    /// never written, not a fault.
    pub fn open(
        path: impl AsRef<Path>,
        options: EngineOptions,
        create_if_missing: bool,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let creating = !path.exists();

        if creating {
            if !create_if_missing {
                return Err(StorageError::StorageDoesNotExist(path));
            }
            std::fs::create_dir_all(&path)?;
            tracing::info!(path = ?path, "creating storage directory");
        }

        let mut partitions = Vec::with_capacity(options.partition_count as usize);
        for p in 0..options.partition_count {
            let data_path = path.join(format!("data_{}.bin", p));
            let index_path = path.join(format!("index_{}.bin", p));

            let file =
                PartitionFile::open(&data_path, options.initial_file_size, options.file_growth_delta)?;
            let index = if creating {
                PartitionIndex::create(&index_path, options.block_size)?
            } else {
                PartitionIndex::load(&index_path)?
            };

            partitions.push(Partition { file, index });
        }

        Ok(Self {
            path,
            options,
            partitions,
        })
    }

    fn partition(&self, object_id: u32) -> &Partition {
        &self.partitions[(object_id % self.options.partition_count) as usize]
    }

    /// Append `data` to the object's block chain.
    ///
    /// The partition index's write guard is held for the whole multi-block
    /// write, so concurrent puts to the same object are serialized and chains
    /// stay consistent. When a write exactly fills the chain's last block a
    /// fresh empty block is pre-allocated so the next put never starts on a
    /// zero-capacity chain head.
    pub fn put(&self, object_id: u32, data: &[u8]) -> StorageResult<()> {
        let partition = self.partition(object_id);
        let block_size = self.options.block_size;

        let mut guard = partition.index.begin_write()?;

        let mut last = match guard.last_block(object_id) {
            Some(block) => block,
            None => guard.append_new_block(object_id),
        };

        let mut remaining = data;
        while !remaining.is_empty() {
            let writable = remaining.len().min(last.remaining_capacity as usize);
            let write_offset = last.offset + u64::from(block_size - last.remaining_capacity);

            partition.file.write_at(&remaining[..writable], write_offset)?;

            let new_capacity = last.remaining_capacity - writable as u32;
            guard.set_last_block_capacity(object_id, new_capacity);

            remaining = &remaining[writable..];

            if !remaining.is_empty() {
                last = guard.append_new_block(object_id);
            } else if new_capacity == 0 {
                // Exact fill: pre-allocate the next block now.
                guard.append_new_block(object_id);
            }
        }

        Ok(())
    }

    /// Reassemble everything ever put for this object, in put order.
    pub fn get(&self, object_id: u32) -> StorageResult<Vec<u8>> {
        let partition = self.partition(object_id);

        let blocks = partition
            .index
            .object_blocks(object_id)
            .ok_or(StorageError::ObjectDoesNotExist(object_id))?;

        partition.file.read_blocks(&blocks, self.options.block_size)
    }

    /// Every object id ever written to this engine, across all partitions.
    pub fn all_object_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .partitions
            .iter()
            .flat_map(|p| p.index.object_ids())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Flush any dirty partition indexes to disk.
    pub fn sync_indexes(&self) -> StorageResult<()> {
        for partition in &self.partitions {
            partition.index.sync()?;
        }
        Ok(())
    }

    /// Sync indexes and flush mapped data. Called before the engine is
    /// dropped by the pool or at shutdown.
    pub fn close(&self) {
        for partition in &self.partitions {
            if let Err(e) = partition.index.sync() {
                tracing::error!(path = ?partition.index.path(), error = %e, "failed to sync index on close");
            }
            if let Err(e) = partition.file.flush() {
                tracing::error!(path = ?partition.file.path(), error = %e, "failed to flush partition on close");
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
