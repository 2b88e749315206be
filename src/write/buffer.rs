//! In-memory accumulation buffer for the write pipeline
//!
//! Ingested points are grouped by storage key and object id until the next
//! flush, so each disk write covers one object's accumulated points instead
//! of one point. The map is taken out whole under the lock and unpacked
//! after releasing it, keeping the critical section short.

use crate::storage::{DataPoint, PolledDataPoint, StorageKey};
use std::collections::HashMap;
use std::sync::Mutex;

/// One flushed unit of work for a writer: all points accumulated for one
/// object under one storage key.
#[derive(Debug, Clone, PartialEq)]
pub struct WritableBatch {
    pub key: StorageKey,
    pub object_id: u32,
    pub points: Vec<DataPoint>,
}

/// Accumulates ingested points between flushes.
#[derive(Default)]
pub struct BatchBuffer {
    state: Mutex<HashMap<StorageKey, HashMap<u32, Vec<DataPoint>>>>,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one ingested point, keyed by its UTC day and counter.
    pub fn add(&self, point: PolledDataPoint) {
        let key = point.storage_key();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .entry(key)
            .or_default()
            .entry(point.object_id)
            .or_default()
            .push(DataPoint::new(point.timestamp, point.value));
    }

    /// Take everything accumulated so far, leaving the buffer empty. Points
    /// within a batch keep their arrival order.
    pub fn drain(&self) -> Vec<WritableBatch> {
        let drained = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *state)
        };

        let mut batches = Vec::new();
        for (key, objects) in drained {
            for (object_id, points) in objects {
                batches.push(WritableBatch {
                    key,
                    object_id,
                    points,
                });
            }
        }
        batches
    }

    pub fn is_empty(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;

    fn point(timestamp: u32, counter_id: u16, object_id: u32, v: f64) -> PolledDataPoint {
        PolledDataPoint {
            timestamp,
            counter_id,
            object_id,
            value: Value::F64(v),
        }
    }

    #[test]
    fn test_groups_by_key_and_object() {
        let buffer = BatchBuffer::new();
        let base = 1_609_459_200; // 2021-01-01T00:00:00Z

        buffer.add(point(base, 1, 10, 1.0));
        buffer.add(point(base + 60, 1, 10, 2.0));
        buffer.add(point(base, 1, 11, 3.0));
        buffer.add(point(base, 2, 10, 4.0));

        let mut batches = buffer.drain();
        batches.sort_by_key(|b| (b.key.counter_id, b.object_id));

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].object_id, 10);
        assert_eq!(batches[0].points.len(), 2);
        assert_eq!(batches[0].points[0].timestamp, base);
        assert_eq!(batches[0].points[1].timestamp, base + 60);
        assert_eq!(batches[1].object_id, 11);
        assert_eq!(batches[2].key.counter_id, 2);
    }

    #[test]
    fn test_day_boundary_splits_batches() {
        let buffer = BatchBuffer::new();
        let midnight = 1_609_459_200;

        buffer.add(point(midnight - 1, 1, 10, 1.0));
        buffer.add(point(midnight, 1, 10, 2.0));

        let batches = buffer.drain();
        assert_eq!(batches.len(), 2);
        assert_ne!(batches[0].key.date, batches[1].key.date);
    }

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = BatchBuffer::new();
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());

        buffer.add(point(100, 1, 10, 1.0));
        assert!(!buffer.is_empty());

        assert_eq!(buffer.drain().len(), 1);
        assert!(buffer.is_empty());
    }
}
