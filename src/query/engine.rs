//! Query engine: parser worker pool and query lifecycle
//!
//! `submit` hands a query to one of `query_parser_count` worker tasks. The
//! worker owns the query end to end: it splits the range into UTC days,
//! fans each day out to the shared reader pool, reassembles the day results
//! in chronological order, runs the aggregation stages, and resolves the
//! caller's oneshot. A single deadline covers the whole round trip; when it
//! expires the caller gets the timeout error and no partial data.

use crate::cache::PointCache;
use crate::query::aggregate::{aggregate_objects, aggregate_timestamps};
use crate::query::reader::{reader_loop, ReaderRequest, ReaderResponse};
use crate::query::{Query, QueryResponse};
use crate::storage::{CounterTable, DataPoint, Date, StorageKey, StoragePool, SECONDS_PER_DAY};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

/// Terminal error reported when a query's deadline expires.
const TIMED_OUT: &str = "query timed out";

const SUBMIT_CHANNEL_SIZE: usize = 64;

/// Sizing knobs for the query pipeline, taken from the query config.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// Number of parser worker tasks; bounds queries in flight
    pub query_parser_count: usize,
    /// Number of reader worker tasks shared by all queries
    pub reader_count: usize,
    /// Deadline for one query end to end
    pub timeout: Duration,
    /// Bound of the shared reader request channel
    pub reader_channel_size: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            query_parser_count: 2,
            reader_count: 4,
            timeout: Duration::from_secs(30),
            reader_channel_size: 64,
        }
    }
}

type Submission = (Query, oneshot::Sender<QueryResponse>);

/// Handle over the running query worker tasks.
pub struct QueryEngine {
    submit_tx: mpsc::Sender<Submission>,
    parser_handles: Vec<JoinHandle<()>>,
    reader_handles: Vec<JoinHandle<()>>,
}

impl QueryEngine {
    /// Spawn the parser and reader worker pools.
    pub fn spawn(
        options: QueryOptions,
        counters: Arc<CounterTable>,
        pool: Arc<StoragePool>,
        cache: Arc<PointCache>,
    ) -> Self {
        let (reader_tx, reader_rx) = mpsc::channel(options.reader_channel_size.max(1));
        let reader_rx = Arc::new(Mutex::new(reader_rx));
        let reader_handles = (0..options.reader_count.max(1))
            .map(|worker_id| {
                tokio::spawn(reader_loop(
                    worker_id,
                    Arc::clone(&reader_rx),
                    Arc::clone(&counters),
                    Arc::clone(&pool),
                    Arc::clone(&cache),
                ))
            })
            .collect();

        let (submit_tx, submit_rx) = mpsc::channel(SUBMIT_CHANNEL_SIZE);
        let submit_rx = Arc::new(Mutex::new(submit_rx));
        let parser_handles = (0..options.query_parser_count.max(1))
            .map(|worker_id| {
                tokio::spawn(parser_loop(
                    worker_id,
                    Arc::clone(&submit_rx),
                    Arc::clone(&counters),
                    reader_tx.clone(),
                    options.timeout,
                ))
            })
            .collect();

        Self {
            submit_tx,
            parser_handles,
            reader_handles,
        }
    }

    /// Queue a query. The returned receiver resolves with exactly one
    /// [`QueryResponse`], including when the queue is full or shut down.
    pub fn submit(&self, query: Query) -> oneshot::Receiver<QueryResponse> {
        let (tx, rx) = oneshot::channel();

        match self.submit_tx.try_send((query, tx)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full((query, tx))) => {
                let _ = tx.send(QueryResponse::error(query.query_id, "query queue is full"));
            }
            Err(mpsc::error::TrySendError::Closed((query, tx))) => {
                let _ = tx.send(QueryResponse::error(query.query_id, "query engine is shut down"));
            }
        }

        rx
    }

    /// Stop accepting queries and wait for the workers to drain. Parser
    /// workers hold the only clones of the reader channel sender, so the
    /// readers stop once the parsers do.
    pub async fn shutdown(self) {
        drop(self.submit_tx);
        for handle in self.parser_handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "query parser task failed");
            }
        }
        for handle in self.reader_handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "reader task failed");
            }
        }
    }
}

async fn parser_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Submission>>>,
    counters: Arc<CounterTable>,
    reader_tx: mpsc::Sender<ReaderRequest>,
    timeout: Duration,
) {
    loop {
        let submission = { rx.lock().await.recv().await };
        let Some((query, respond)) = submission else { break };

        let query_id = query.query_id;
        tracing::debug!(worker_id, query_id, counter_id = query.counter_id, "processing query");

        let response = process_query(query, &counters, &reader_tx, timeout).await;

        if respond.send(response).is_err() {
            tracing::debug!(query_id, "query caller went away");
        }
    }
}

async fn process_query(
    query: Query,
    counters: &CounterTable,
    reader_tx: &mpsc::Sender<ReaderRequest>,
    timeout: Duration,
) -> QueryResponse {
    let deadline = Instant::now() + timeout;

    let Some(ty) = counters.logical_type(query.counter_id) else {
        return QueryResponse::error(
            query.query_id,
            format!("unsupported counter type for counter {}", query.counter_id),
        );
    };

    if query.from > query.to {
        return QueryResponse::ok(query.query_id, HashMap::new());
    }

    // Fan the range out as one request per UTC day.
    let first_day = query.from / SECONDS_PER_DAY;
    let last_day = query.to / SECONDS_PER_DAY;
    let day_count = (last_day - first_day + 1) as usize;

    let (response_tx, mut response_rx) = mpsc::channel::<ReaderResponse>(day_count);

    for (request_index, day) in (first_day..=last_day).enumerate() {
        let request = ReaderRequest {
            key: StorageKey::new(Date::from_unix(day * SECONDS_PER_DAY), query.counter_id),
            object_ids: query.object_ids.clone(),
            from: query.from,
            to: query.to,
            request_index,
            response_tx: response_tx.clone(),
        };

        match timeout_at(deadline, reader_tx.send(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return QueryResponse::error(query.query_id, "reader pool unavailable")
            }
            Err(_) => return QueryResponse::error(query.query_id, TIMED_OUT),
        }
    }
    drop(response_tx);

    // Collect day results, slotted back into chronological order.
    let mut days: Vec<Option<HashMap<u32, Vec<DataPoint>>>> = vec![None; day_count];
    let mut received = 0;
    while received < day_count {
        match timeout_at(deadline, response_rx.recv()).await {
            Ok(Some(response)) => {
                if let Some(slot) = days.get_mut(response.request_index) {
                    if slot.replace(response.data).is_none() {
                        received += 1;
                    }
                }
            }
            Ok(None) => return QueryResponse::error(query.query_id, "reader pool unavailable"),
            Err(_) => return QueryResponse::error(query.query_id, TIMED_OUT),
        }
    }

    if Instant::now() >= deadline {
        return QueryResponse::error(query.query_id, TIMED_OUT);
    }

    // Vertical aggregation runs per day, then days are concatenated in
    // order; within-day streams are already in write order.
    let vertical = !query.object_aggregation.is_none() && ty.is_numeric();
    let mut merged: HashMap<u32, Vec<DataPoint>> = HashMap::new();
    for day in days.into_iter().flatten() {
        let day = if vertical {
            aggregate_objects(&day, query.object_aggregation)
        } else {
            day
        };
        for (object_id, mut points) in day {
            merged.entry(object_id).or_default().append(&mut points);
        }
    }

    if Instant::now() >= deadline {
        return QueryResponse::error(query.query_id, TIMED_OUT);
    }

    if !query.timestamp_aggregation.is_none() && ty.is_numeric() {
        merged = aggregate_timestamps(
            merged,
            query.timestamp_aggregation,
            query.from,
            query.interval,
        );
    } else {
        for points in merged.values_mut() {
            points.sort_by_key(|p| p.timestamp);
        }
    }

    QueryResponse::ok(query.query_id, merged)
}
