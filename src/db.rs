//! Datastore facade
//!
//! Wires the storage pool, decoded-point cache, counter table, write
//! pipeline and query engine together behind the two public entry points:
//! `write` for ingest batches and `submit` for range queries. Also owns the
//! maintenance tasks that sweep idle day stores out of the pool and flush
//! dirty partition indexes on an interval.

use crate::cache::PointCache;
use crate::config::{Config, ConfigError};
use crate::query::{Query, QueryEngine, QueryResponse};
use crate::storage::{PolledDataPoint, StoragePool};
use crate::write::{PipelineClosed, WritePipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// A running meterdb instance.
pub struct Datastore {
    pool: Arc<StoragePool>,
    pipeline: WritePipeline,
    query_engine: QueryEngine,
    shutdown_tx: watch::Sender<bool>,
    maintenance_handles: Vec<JoinHandle<()>>,
}

impl Datastore {
    /// Validate the configuration and start all pipelines and maintenance
    /// tasks. Storage directories are created lazily on first write.
    pub fn open(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let counters = Arc::new(config.counter_table());
        let pool = Arc::new(StoragePool::new(
            &config.storage.data_dir,
            config.storage.engine_options(),
        ));
        let cache = Arc::new(PointCache::new(
            config.cache.max_entries,
            config.cache.max_bytes,
        ));

        let pipeline = WritePipeline::spawn(
            config.pipeline.pipeline_options(),
            Arc::clone(&counters),
            Arc::clone(&pool),
            Arc::clone(&cache),
        );

        let query_engine = QueryEngine::spawn(
            config.query.query_options(),
            counters,
            Arc::clone(&pool),
            Arc::clone(&cache),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sweep_handle = tokio::spawn(maintenance_loop(
            Duration::from_secs(config.storage.cleanup_interval_secs.max(1)),
            shutdown_rx.clone(),
            Arc::clone(&pool),
            StoragePool::sweep,
        ));
        let sync_handle = tokio::spawn(maintenance_loop(
            Duration::from_secs(config.storage.index_sync_interval_secs.max(1)),
            shutdown_rx,
            Arc::clone(&pool),
            StoragePool::sync_all,
        ));

        tracing::info!(
            data_dir = %config.storage.data_dir,
            counters = config.counters.len(),
            "datastore opened"
        );

        Ok(Self {
            pool,
            pipeline,
            query_engine,
            shutdown_tx,
            maintenance_handles: vec![sweep_handle, sync_handle],
        })
    }

    /// Queue a batch of polled points for ingestion. Points for counters not
    /// in the configuration are dropped with a warning.
    pub async fn write(&self, batch: Vec<PolledDataPoint>) -> Result<(), PipelineClosed> {
        self.pipeline.write(batch).await
    }

    /// Queue a range query. The receiver resolves with exactly one response.
    pub fn submit(&self, query: Query) -> oneshot::Receiver<QueryResponse> {
        self.query_engine.submit(query)
    }

    /// Drain the write path, stop the query workers and maintenance tasks,
    /// and close every open day store.
    pub async fn shutdown(self) {
        self.pipeline.shutdown().await;
        self.query_engine.shutdown().await;

        let _ = self.shutdown_tx.send(true);
        for handle in self.maintenance_handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "maintenance task failed");
            }
        }

        self.pool.sync_all();
        self.pool.close_all();

        tracing::info!("datastore shut down");
    }
}

async fn maintenance_loop(
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    pool: Arc<StoragePool>,
    run: fn(&StoragePool),
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => run(&pool),
            _ = shutdown_rx.changed() => return,
        }
    }
}
