//! Core data types for the meterdb storage layer
//!
//! This module defines the fundamental types used throughout the engine:
//! - `Date` and `StorageKey`: the per-day, per-counter partitioning axis
//! - `Value` and `LogicalType`: the closed set of counter value types
//! - `DataPoint`: one measurement of one counter on one object
//! - `PolledDataPoint`: the raw ingest unit produced by the polling engine
//! - `CounterTable`: counter id → logical type, built from configuration

use chrono::{Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Seconds in one calendar day; the time axis is sharded on UTC day boundaries.
pub const SECONDS_PER_DAY: u32 = 86_400;

/// A UTC calendar day, derived from a Unix timestamp by truncating to the
/// day boundary. Used as half of every `StorageKey`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Date {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl Date {
    /// Derive the UTC calendar day containing a Unix timestamp (seconds).
    pub fn from_unix(timestamp: u32) -> Self {
        let dt = Utc
            .timestamp_opt(i64::from(timestamp), 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap());
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
        }
    }

    /// The current UTC calendar day.
    pub fn today() -> Self {
        Self::from_unix(Utc::now().timestamp().max(0) as u32)
    }

    /// Relative directory for this day: `<year>/<month>/<day>`.
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(self.year.to_string())
            .join(self.month.to_string())
            .join(self.day.to_string())
    }
}

impl std::fmt::Display for Date {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Identifies exactly one per-day, per-counter storage engine instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StorageKey {
    pub date: Date,
    pub counter_id: u16,
}

impl StorageKey {
    pub fn new(date: Date, counter_id: u16) -> Self {
        Self { date, counter_id }
    }

    /// Relative directory for this key: `<year>/<month>/<day>/<counter_id>`.
    pub fn dir_path(&self) -> PathBuf {
        self.date.dir_path().join(self.counter_id.to_string())
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.date, self.counter_id)
    }
}

/// Logical value type of a counter, configured per counter id.
///
/// The byte stream is not self-describing: the codec and the aggregators are
/// dispatched on this type. Unsigned and plain `int`/`uint` configurations are
/// aliases of the fixed-width variants with identical record layouts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    #[serde(alias = "uint64", alias = "int", alias = "uint")]
    Int64,
    Float64,
    #[serde(alias = "uint32")]
    Int32,
    Float32,
    #[serde(rename = "string")]
    Str,
}

impl LogicalType {
    /// Fixed record width in bytes, or `None` for variable-width strings.
    pub fn record_width(&self) -> Option<usize> {
        match self {
            LogicalType::Int64 | LogicalType::Float64 => Some(12),
            LogicalType::Int32 | LogicalType::Float32 => Some(8),
            LogicalType::Str => None,
        }
    }

    /// String counters are drilldown-only; they are never aggregated.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, LogicalType::Str)
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalType::Int64 => write!(f, "int64"),
            LogicalType::Float64 => write!(f, "float64"),
            LogicalType::Int32 => write!(f, "int32"),
            LogicalType::Float32 => write!(f, "float32"),
            LogicalType::Str => write!(f, "string"),
        }
    }
}

/// A counter value. Closed tagged union driven by the counter configuration;
/// serialize/deserialize and the aggregators match exhaustively over it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    I64(i64),
    F64(f64),
    I32(i32),
    F32(f32),
    Str(String),
}

impl Value {
    /// The logical type this value belongs to.
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Value::I64(_) => LogicalType::Int64,
            Value::F64(_) => LogicalType::Float64,
            Value::I32(_) => LogicalType::Int32,
            Value::F32(_) => LogicalType::Float32,
            Value::Str(_) => LogicalType::Str,
        }
    }

    /// Estimated in-memory size, used for cache cost accounting.
    pub fn cost_bytes(&self) -> usize {
        match self {
            Value::Str(s) => std::mem::size_of::<Value>() + s.len(),
            _ => std::mem::size_of::<Value>(),
        }
    }
}

/// A single measurement: one counter value at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataPoint {
    /// Unix timestamp in seconds
    pub timestamp: u32,
    /// The measured value, typed per the counter configuration
    pub value: Value,
}

impl DataPoint {
    pub fn new(timestamp: u32, value: Value) -> Self {
        Self { timestamp, value }
    }

    /// Estimated in-memory size, used for cache cost accounting.
    pub fn cost_bytes(&self) -> usize {
        4 + self.value.cost_bytes()
    }
}

/// The raw ingest unit delivered by the polling engine. Batches arrive in
/// arbitrary sizes, not necessarily sorted or deduplicated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolledDataPoint {
    pub timestamp: u32,
    pub counter_id: u16,
    pub object_id: u32,
    pub value: Value,
}

impl PolledDataPoint {
    /// The storage key this sample belongs to.
    pub fn storage_key(&self) -> StorageKey {
        StorageKey::new(Date::from_unix(self.timestamp), self.counter_id)
    }
}

/// Counter id → logical type lookup, built once from configuration and shared
/// read-only across the write and query pipelines.
#[derive(Debug, Clone, Default)]
pub struct CounterTable {
    types: HashMap<u16, LogicalType>,
}

impl CounterTable {
    pub fn new(types: HashMap<u16, LogicalType>) -> Self {
        Self { types }
    }

    pub fn logical_type(&self, counter_id: u16) -> Option<LogicalType> {
        self.types.get(&counter_id).copied()
    }

    pub fn contains(&self, counter_id: u16) -> bool {
        self.types.contains_key(&counter_id)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<(u16, LogicalType)> for CounterTable {
    fn from_iter<T: IntoIterator<Item = (u16, LogicalType)>>(iter: T) -> Self {
        Self {
            types: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_from_unix_truncates_to_day() {
        // 2021-01-01T00:00:00Z
        let midnight = 1_609_459_200;
        let date = Date::from_unix(midnight);
        assert_eq!(
            date,
            Date {
                year: 2021,
                month: 1,
                day: 1
            }
        );

        // Any second within the same day maps to the same Date
        assert_eq!(Date::from_unix(midnight + 86_399), date);
        assert_ne!(Date::from_unix(midnight + 86_400), date);
    }

    #[test]
    fn test_storage_key_dir_path() {
        let key = StorageKey::new(
            Date {
                year: 2021,
                month: 3,
                day: 9,
            },
            42,
        );
        assert_eq!(key.dir_path(), PathBuf::from("2021/3/9/42"));
    }

    #[test]
    fn test_logical_type_aliases() {
        let ty: LogicalType = serde_json::from_str("\"uint64\"").unwrap();
        assert_eq!(ty, LogicalType::Int64);

        let ty: LogicalType = serde_json::from_str("\"uint32\"").unwrap();
        assert_eq!(ty, LogicalType::Int32);

        let ty: LogicalType = serde_json::from_str("\"string\"").unwrap();
        assert_eq!(ty, LogicalType::Str);
    }

    #[test]
    fn test_record_widths() {
        assert_eq!(LogicalType::Int64.record_width(), Some(12));
        assert_eq!(LogicalType::Float64.record_width(), Some(12));
        assert_eq!(LogicalType::Int32.record_width(), Some(8));
        assert_eq!(LogicalType::Float32.record_width(), Some(8));
        assert_eq!(LogicalType::Str.record_width(), None);
    }

    #[test]
    fn test_counter_table_lookup() {
        let table: CounterTable = [(1, LogicalType::Float64), (2, LogicalType::Str)]
            .into_iter()
            .collect();

        assert_eq!(table.logical_type(1), Some(LogicalType::Float64));
        assert_eq!(table.logical_type(2), Some(LogicalType::Str));
        assert_eq!(table.logical_type(99), None);
        assert!(table.contains(1));
        assert!(!table.contains(99));
    }

    #[test]
    fn test_polled_point_storage_key() {
        let point = PolledDataPoint {
            timestamp: 1_609_459_200 + 100,
            counter_id: 7,
            object_id: 3,
            value: Value::F64(42.5),
        };
        let key = point.storage_key();
        assert_eq!(key.counter_id, 7);
        assert_eq!(
            key.date,
            Date {
                year: 2021,
                month: 1,
                day: 1
            }
        );
    }
}
