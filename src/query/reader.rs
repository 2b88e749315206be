//! Reader worker pool
//!
//! Readers serve one day of one query at a time: open that day's storage
//! through the pool (never creating it), decode each requested object's
//! stream, filter to the query range, and send the result back on the
//! request's own response channel tagged with the request index so the
//! parser can slot days back into chronological order.
//!
//! A missing day or object is empty data. A corrupt object is skipped with
//! a log line; the rest of the day still comes back. Decoded streams are
//! cached for every day except the current one, whose streams are still
//! growing.

use crate::cache::PointCache;
use crate::storage::{codec, CounterTable, DataPoint, Date, StorageKey, StoragePool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One day's worth of work for a reader, fanned out by a parser worker.
pub struct ReaderRequest {
    pub key: StorageKey,
    /// Objects to read; empty means every object with data that day
    pub object_ids: Vec<u32>,
    /// Range filter, inclusive on both ends
    pub from: u32,
    pub to: u32,
    /// Position of this day in the query's day span
    pub request_index: usize,
    /// Per-query channel the result is delivered on
    pub response_tx: mpsc::Sender<ReaderResponse>,
}

/// One day's result, tagged for reordering.
pub struct ReaderResponse {
    pub request_index: usize,
    pub data: HashMap<u32, Vec<DataPoint>>,
}

pub async fn reader_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<ReaderRequest>>>,
    counters: Arc<CounterTable>,
    pool: Arc<StoragePool>,
    cache: Arc<PointCache>,
) {
    loop {
        let request = { rx.lock().await.recv().await };
        let Some(request) = request else { break };

        let data = read_day(&request, &counters, &pool, &cache);

        tracing::debug!(
            worker_id,
            key = %request.key,
            objects = data.len(),
            "day read complete"
        );

        // The parser may have timed out and dropped its receiver.
        let _ = request
            .response_tx
            .send(ReaderResponse {
                request_index: request.request_index,
                data,
            })
            .await;
    }
}

/// Read and filter one day. Absence at any level degrades to empty data.
pub fn read_day(
    request: &ReaderRequest,
    counters: &CounterTable,
    pool: &StoragePool,
    cache: &PointCache,
) -> HashMap<u32, Vec<DataPoint>> {
    let key = request.key;

    let Some(ty) = counters.logical_type(key.counter_id) else {
        tracing::warn!(%key, "read for unknown counter");
        return HashMap::new();
    };

    let engine = match pool.get(key, false) {
        Ok(engine) => engine,
        Err(e) if e.is_not_found() => return HashMap::new(),
        Err(e) => {
            tracing::error!(%key, error = %e, "failed to open storage for read");
            return HashMap::new();
        }
    };

    let object_ids = if request.object_ids.is_empty() {
        engine.all_object_ids()
    } else {
        request.object_ids.clone()
    };

    let cacheable = key.date != Date::today();
    let mut data = HashMap::new();

    for object_id in object_ids {
        let stream = match cache.get(key, object_id) {
            Some(stream) => stream,
            None => {
                let bytes = match engine.get(object_id) {
                    Ok(bytes) => bytes,
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => {
                        tracing::warn!(%key, object_id, error = %e, "skipping unreadable object");
                        continue;
                    }
                };

                let points = match codec::deserialize(&bytes, ty) {
                    Ok(points) => points,
                    Err(e) => {
                        tracing::warn!(%key, object_id, error = %e, "skipping corrupt object");
                        continue;
                    }
                };

                let stream = Arc::new(points);
                if cacheable {
                    cache.insert(key, object_id, Arc::clone(&stream));
                }
                stream
            }
        };

        let filtered: Vec<DataPoint> = stream
            .iter()
            .filter(|p| p.timestamp >= request.from && p.timestamp <= request.to)
            .cloned()
            .collect();

        if !filtered.is_empty() {
            data.insert(object_id, filtered);
        }
    }

    data
}
