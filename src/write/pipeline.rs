//! Ingest loop, flush timer and writer worker pool
//!
//! The write path is: `write()` sends a raw batch on the bounded ingest
//! channel; the ingest loop drops points for unconfigured counters and folds
//! the rest into the [`BatchBuffer`]; a flush timer drains the buffer into
//! per-object batches on the bounded write channel; a pool of writer workers
//! encodes each batch and appends it to the right storage engine, then
//! invalidates the decoded-point cache for that object.
//!
//! A failed batch is logged and dropped. There is no retry queue; durability
//! is at-most-once per flush.

use crate::cache::PointCache;
use crate::storage::{codec, CounterTable, PolledDataPoint, StoragePool};
use crate::write::buffer::{BatchBuffer, WritableBatch};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Sizing knobs for the write pipeline, taken from the pipeline config.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Number of writer worker tasks
    pub writer_count: usize,
    /// How often the batch buffer is drained to the writers
    pub flush_interval: Duration,
    /// Bound of the raw ingest channel; `write()` applies backpressure here
    pub ingest_channel_size: usize,
    /// Bound of the per-object batch channel feeding the writers
    pub write_channel_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            writer_count: 4,
            flush_interval: Duration::from_secs(5),
            ingest_channel_size: 64,
            write_channel_size: 256,
        }
    }
}

/// The pipeline was shut down; no further writes are accepted.
#[derive(Debug, thiserror::Error)]
#[error("write pipeline is shut down")]
pub struct PipelineClosed;

/// Handle over the running write pipeline tasks.
pub struct WritePipeline {
    ingest_tx: mpsc::Sender<Vec<PolledDataPoint>>,
    write_tx: mpsc::Sender<WritableBatch>,
    buffer: Arc<BatchBuffer>,
    shutdown_tx: watch::Sender<bool>,
    ingest_handle: JoinHandle<()>,
    flush_handle: JoinHandle<()>,
    writer_handles: Vec<JoinHandle<()>>,
}

impl WritePipeline {
    /// Spawn the ingest loop, flush timer and writer workers.
    pub fn spawn(
        options: PipelineOptions,
        counters: Arc<CounterTable>,
        pool: Arc<StoragePool>,
        cache: Arc<PointCache>,
    ) -> Self {
        let buffer = Arc::new(BatchBuffer::new());
        let (ingest_tx, ingest_rx) = mpsc::channel(options.ingest_channel_size.max(1));
        let (write_tx, write_rx) = mpsc::channel(options.write_channel_size.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ingest_handle = tokio::spawn(ingest_loop(
            ingest_rx,
            Arc::clone(&counters),
            Arc::clone(&buffer),
        ));

        let flush_handle = tokio::spawn(flush_loop(
            options.flush_interval,
            Arc::clone(&buffer),
            write_tx.clone(),
            shutdown_rx,
        ));

        let write_rx = Arc::new(Mutex::new(write_rx));
        let writer_handles = (0..options.writer_count.max(1))
            .map(|worker_id| {
                tokio::spawn(writer_loop(
                    worker_id,
                    Arc::clone(&write_rx),
                    Arc::clone(&counters),
                    Arc::clone(&pool),
                    Arc::clone(&cache),
                ))
            })
            .collect();

        Self {
            ingest_tx,
            write_tx,
            buffer,
            shutdown_tx,
            ingest_handle,
            flush_handle,
            writer_handles,
        }
    }

    /// Queue a raw batch for ingestion. Blocks when the ingest channel is
    /// full; fails only after shutdown.
    pub async fn write(&self, batch: Vec<PolledDataPoint>) -> Result<(), PipelineClosed> {
        self.ingest_tx.send(batch).await.map_err(|_| PipelineClosed)
    }

    /// Drain everything in flight and stop all tasks: close the ingest
    /// channel, stop the flush timer, flush the buffer one last time, then
    /// let the writers run the write channel dry.
    pub async fn shutdown(self) {
        drop(self.ingest_tx);
        if let Err(e) = self.ingest_handle.await {
            tracing::error!(error = %e, "ingest task failed");
        }

        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.flush_handle.await {
            tracing::error!(error = %e, "flush task failed");
        }

        for batch in self.buffer.drain() {
            if self.write_tx.send(batch).await.is_err() {
                break;
            }
        }
        drop(self.write_tx);

        for handle in self.writer_handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "writer task failed");
            }
        }
    }
}

async fn ingest_loop(
    mut rx: mpsc::Receiver<Vec<PolledDataPoint>>,
    counters: Arc<CounterTable>,
    buffer: Arc<BatchBuffer>,
) {
    while let Some(batch) = rx.recv().await {
        for point in batch {
            if !counters.contains(point.counter_id) {
                tracing::warn!(
                    counter_id = point.counter_id,
                    object_id = point.object_id,
                    "dropping point for unknown counter"
                );
                continue;
            }
            buffer.add(point);
        }
    }
}

async fn flush_loop(
    interval: Duration,
    buffer: Arc<BatchBuffer>,
    write_tx: mpsc::Sender<WritableBatch>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for batch in buffer.drain() {
                    if write_tx.send(batch).await.is_err() {
                        return;
                    }
                }
            }
            _ = shutdown_rx.changed() => return,
        }
    }
}

async fn writer_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WritableBatch>>>,
    counters: Arc<CounterTable>,
    pool: Arc<StoragePool>,
    cache: Arc<PointCache>,
) {
    loop {
        let batch = { rx.lock().await.recv().await };
        let Some(batch) = batch else { break };

        let Some(ty) = counters.logical_type(batch.key.counter_id) else {
            tracing::warn!(key = %batch.key, "batch for unknown counter, dropping");
            continue;
        };

        let bytes = match codec::serialize(&batch.points, ty) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(
                    worker_id,
                    key = %batch.key,
                    object_id = batch.object_id,
                    error = %e,
                    "failed to encode batch, dropping"
                );
                continue;
            }
        };

        let engine = match pool.get(batch.key, true) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::error!(key = %batch.key, error = %e, "failed to open storage, dropping batch");
                continue;
            }
        };

        if let Err(e) = engine.put(batch.object_id, &bytes) {
            tracing::error!(
                key = %batch.key,
                object_id = batch.object_id,
                error = %e,
                "write failed, dropping batch"
            );
            continue;
        }

        cache.invalidate(batch.key, batch.object_id);

        tracing::debug!(
            worker_id,
            key = %batch.key,
            object_id = batch.object_id,
            points = batch.points.len(),
            "wrote batch"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DataPoint, Date, EngineOptions, LogicalType, StorageKey, Value};
    use tempfile::tempdir;

    const BASE_TS: u32 = 1_609_459_200; // 2021-01-01T00:00:00Z

    fn counters() -> Arc<CounterTable> {
        Arc::new([(1u16, LogicalType::Float64)].into_iter().collect())
    }

    fn pool(dir: &std::path::Path) -> Arc<StoragePool> {
        Arc::new(StoragePool::new(
            dir,
            EngineOptions {
                partition_count: 2,
                block_size: 64,
                initial_file_size: 256,
                file_growth_delta: 256,
            },
        ))
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            writer_count: 2,
            // Long enough that shutdown, not the timer, triggers the flush
            flush_interval: Duration::from_secs(3600),
            ingest_channel_size: 8,
            write_channel_size: 8,
        }
    }

    fn point(timestamp: u32, counter_id: u16, object_id: u32, v: f64) -> PolledDataPoint {
        PolledDataPoint {
            timestamp,
            counter_id,
            object_id,
            value: Value::F64(v),
        }
    }

    #[tokio::test]
    async fn test_write_then_shutdown_persists() {
        let dir = tempdir().unwrap();
        let pool = pool(dir.path());
        let cache = Arc::new(PointCache::new(16, 1 << 20));

        let pipeline = WritePipeline::spawn(
            options(),
            counters(),
            Arc::clone(&pool),
            Arc::clone(&cache),
        );

        pipeline
            .write(vec![
                point(BASE_TS, 1, 10, 1.5),
                point(BASE_TS + 300, 1, 10, 2.5),
                point(BASE_TS, 1, 11, 9.0),
            ])
            .await
            .unwrap();
        pipeline.shutdown().await;

        let key = StorageKey::new(
            Date {
                year: 2021,
                month: 1,
                day: 1,
            },
            1,
        );
        let engine = pool.get(key, false).unwrap();

        let bytes = engine.get(10).unwrap();
        let points = codec::deserialize(&bytes, LogicalType::Float64).unwrap();
        assert_eq!(
            points,
            vec![
                DataPoint::new(BASE_TS, Value::F64(1.5)),
                DataPoint::new(BASE_TS + 300, Value::F64(2.5)),
            ]
        );

        let bytes = engine.get(11).unwrap();
        let points = codec::deserialize(&bytes, LogicalType::Float64).unwrap();
        assert_eq!(points, vec![DataPoint::new(BASE_TS, Value::F64(9.0))]);
    }

    #[tokio::test]
    async fn test_unknown_counter_dropped() {
        let dir = tempdir().unwrap();
        let pool = pool(dir.path());
        let cache = Arc::new(PointCache::new(16, 1 << 20));

        let pipeline = WritePipeline::spawn(
            options(),
            counters(),
            Arc::clone(&pool),
            Arc::clone(&cache),
        );

        pipeline.write(vec![point(BASE_TS, 99, 10, 1.0)]).await.unwrap();
        pipeline.shutdown().await;

        // Nothing reached disk: no storage was ever created for counter 99
        assert_eq!(pool.open_count(), 0);
        let key = StorageKey::new(
            Date {
                year: 2021,
                month: 1,
                day: 1,
            },
            99,
        );
        assert!(pool.get(key, false).is_err());
    }

    #[tokio::test]
    async fn test_write_invalidates_cache() {
        let dir = tempdir().unwrap();
        let pool = pool(dir.path());
        let cache = Arc::new(PointCache::new(16, 1 << 20));

        let key = StorageKey::new(
            Date {
                year: 2021,
                month: 1,
                day: 1,
            },
            1,
        );
        cache.insert(
            key,
            10,
            Arc::new(vec![DataPoint::new(BASE_TS, Value::F64(0.0))]),
        );

        let pipeline = WritePipeline::spawn(
            options(),
            counters(),
            Arc::clone(&pool),
            Arc::clone(&cache),
        );
        pipeline.write(vec![point(BASE_TS + 60, 1, 10, 5.0)]).await.unwrap();
        pipeline.shutdown().await;

        assert!(cache.get(key, 10).is_none());
    }

    #[tokio::test]
    async fn test_write_after_shutdown_fails() {
        let dir = tempdir().unwrap();
        let pipeline = WritePipeline::spawn(
            options(),
            counters(),
            pool(dir.path()),
            Arc::new(PointCache::new(16, 1 << 20)),
        );

        let tx = pipeline.ingest_tx.clone();
        pipeline.shutdown().await;
        assert!(tx.send(vec![point(BASE_TS, 1, 10, 1.0)]).await.is_err());
    }
}
