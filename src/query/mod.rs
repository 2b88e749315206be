//! Query pipeline: parser workers, day readers and aggregation
//!
//! A query names a counter, a time range and an object set; it flows through
//! a parser worker that fans the range out per UTC day to a shared reader
//! pool, collects the day results, applies vertical (across objects) and
//! horizontal (across time) aggregation, and resolves the caller's oneshot
//! with a [`QueryResponse`]. The whole round trip runs under one deadline;
//! on expiry the caller gets `"query timed out"` and no partial data.

pub mod aggregate;
pub mod engine;
pub mod reader;

pub use engine::{QueryEngine, QueryOptions};

use crate::storage::DataPoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reduction applied across objects (vertical) or across time (horizontal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Avg,
    Sum,
    Min,
    Max,
    Count,
    #[default]
    None,
}

impl Aggregation {
    pub fn is_none(&self) -> bool {
        matches!(self, Aggregation::None)
    }
}

/// A range query over one counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Caller-chosen correlation id, echoed back in the response
    pub query_id: u64,
    /// Range start, Unix seconds, inclusive
    pub from: u32,
    /// Range end, Unix seconds, inclusive
    pub to: u32,
    /// Objects to read; empty means every object with data in the range
    #[serde(default)]
    pub object_ids: Vec<u32>,
    pub counter_id: u16,
    /// Reduction across objects at equal timestamps, keyed under object 0
    #[serde(default)]
    pub object_aggregation: Aggregation,
    /// Reduction across time into `interval`-sized buckets
    #[serde(default)]
    pub timestamp_aggregation: Aggregation,
    /// Bucket width in seconds; 0 collapses the whole range into one bucket
    #[serde(default)]
    pub interval: u32,
}

/// Result of one query: per-object point series, sorted by timestamp, or a
/// terminal error with no data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query_id: u64,
    pub data: HashMap<u32, Vec<DataPoint>>,
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn ok(query_id: u64, data: HashMap<u32, Vec<DataPoint>>) -> Self {
        Self {
            query_id,
            data,
            error: None,
        }
    }

    pub fn error(query_id: u64, message: impl Into<String>) -> Self {
        Self {
            query_id,
            data: HashMap::new(),
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_serde() {
        let agg: Aggregation = serde_json::from_str("\"avg\"").unwrap();
        assert_eq!(agg, Aggregation::Avg);

        let agg: Aggregation = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(agg, Aggregation::None);
    }

    #[test]
    fn test_query_defaults() {
        let query: Query = serde_json::from_str(
            r#"{"query_id": 1, "from": 0, "to": 100, "counter_id": 7}"#,
        )
        .unwrap();

        assert!(query.object_ids.is_empty());
        assert_eq!(query.object_aggregation, Aggregation::None);
        assert_eq!(query.timestamp_aggregation, Aggregation::None);
        assert_eq!(query.interval, 0);
    }
}
