//! Persistent storage layer
//!
//! Data is partitioned twice: by `(date, counter)` into independent storage
//! engines on disk, and inside each engine by `object_id` across a fixed
//! number of memory-mapped partition files. Each partition file is a block
//! allocator whose index records every object's chain of blocks; the codec
//! turns typed point sequences into the opaque byte payloads the allocator
//! stores.

pub mod codec;
pub mod engine;
pub mod error;
pub mod index;
pub mod partition;
pub mod pool;
pub mod types;

pub use engine::{EngineOptions, StorageEngine};
pub use error::{StorageError, StorageResult};
pub use index::ObjectBlock;
pub use partition::PartitionFile;
pub use pool::StoragePool;
pub use types::{
    CounterTable, DataPoint, Date, LogicalType, PolledDataPoint, StorageKey, Value,
    SECONDS_PER_DAY,
};
