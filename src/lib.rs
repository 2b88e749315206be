//! # meterdb
//!
//! A time-series store for periodically polled network device counters.
//! Pollers deliver batches of `(timestamp, object, counter, value)` samples;
//! meterdb partitions them per UTC day and counter, appends them through a
//! block allocator over memory-mapped files, and answers range queries with
//! optional aggregation across objects and across time.
//!
//! ## Modules
//!
//! - [`storage`]: block allocator, partition indexes, per-day engines, pool
//! - [`write`]: ingest batching, flush timer, writer worker pool
//! - [`query`]: query workers, day readers, aggregation
//! - [`cache`]: decoded-point cache shared by readers and writers
//! - [`db`]: the [`Datastore`] facade tying it all together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meterdb::{Config, Datastore, PolledDataPoint, Query, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let db = Datastore::open(&config)?;
//!
//!     db.write(vec![PolledDataPoint {
//!         timestamp: 1_609_459_260,
//!         counter_id: 1,
//!         object_id: 10,
//!         value: Value::F64(42.5),
//!     }])
//!     .await?;
//!
//!     let response = db
//!         .submit(Query {
//!             query_id: 1,
//!             from: 1_609_459_200,
//!             to: 1_609_462_800,
//!             object_ids: vec![],
//!             counter_id: 1,
//!             object_aggregation: Default::default(),
//!             timestamp_aggregation: Default::default(),
//!             interval: 0,
//!         })
//!         .await?;
//!
//!     println!("objects returned: {}", response.data.len());
//!
//!     db.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod db;
pub mod query;
pub mod storage;
pub mod write;

// Re-export top-level types for convenience
pub use cache::PointCache;
pub use config::{generate_default_config, Config, ConfigError};
pub use db::Datastore;
pub use query::{Aggregation, Query, QueryEngine, QueryOptions, QueryResponse};
pub use storage::{
    CounterTable, DataPoint, Date, EngineOptions, LogicalType, PolledDataPoint, StorageEngine,
    StorageError, StorageKey, StoragePool, StorageResult, Value,
};
pub use write::{PipelineClosed, PipelineOptions, WritePipeline};
