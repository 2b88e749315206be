//! Decoded-point cache
//!
//! Query readers decode whole per-object day streams from disk; repeat
//! queries over the same days are common, so decoded streams are cached
//! keyed by `(storage key, object id)`. The cache is bounded two ways: an
//! entry cap enforced by the LRU itself and a byte budget enforced by
//! popping least-recently-used entries after each insert. Entries are
//! shared out as `Arc` slices so hits never clone point data.
//!
//! The current day is never cached (its streams are still growing); that
//! policy lives in the readers. Writers invalidate the entry for every
//! `(key, object)` they touch, so a stale closed-day entry can only exist
//! between a write and its invalidation.

use crate::storage::{DataPoint, StorageKey};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Cache key: one object's stream within one day/counter store.
type CacheKey = (StorageKey, u32);

struct CacheState {
    entries: LruCache<CacheKey, Arc<Vec<DataPoint>>>,
    current_bytes: usize,
}

/// Bounded LRU cache of decoded per-object day streams.
pub struct PointCache {
    state: Mutex<CacheState>,
    max_bytes: usize,
}

impl PointCache {
    /// Create a cache bounded to `max_entries` entries and `max_bytes` of
    /// estimated point data.
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(cap),
                current_bytes: 0,
            }),
            max_bytes,
        }
    }

    fn entry_cost(points: &[DataPoint]) -> usize {
        points.iter().map(DataPoint::cost_bytes).sum()
    }

    /// Look up a decoded stream, refreshing its recency on hit.
    pub fn get(&self, key: StorageKey, object_id: u32) -> Option<Arc<Vec<DataPoint>>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entries.get(&(key, object_id)).cloned()
    }

    /// Insert a decoded stream, evicting least-recently-used entries until
    /// the byte budget holds again.
    pub fn insert(&self, key: StorageKey, object_id: u32, points: Arc<Vec<DataPoint>>) {
        let cost = Self::entry_cost(&points);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(old) = state.entries.push((key, object_id), points) {
            // push returns the displaced entry: either the old value under
            // this key or an LRU eviction at capacity
            state.current_bytes -= Self::entry_cost(&old.1);
        }
        state.current_bytes += cost;

        while state.current_bytes > self.max_bytes {
            match state.entries.pop_lru() {
                Some((_, evicted)) => state.current_bytes -= Self::entry_cost(&evicted),
                None => break,
            }
        }
    }

    /// Drop the cached stream for one `(key, object)`. Called by writers
    /// after every put so closed-day reads never see pre-write data.
    pub fn invalidate(&self, key: StorageKey, object_id: u32) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(points) = state.entries.pop(&(key, object_id)) {
            state.current_bytes -= Self::entry_cost(&points);
        }
    }

    /// Number of cached streams.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current estimated byte cost of all cached streams.
    pub fn cost_bytes(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .current_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Date, Value};

    fn key(day: u32) -> StorageKey {
        StorageKey::new(
            Date {
                year: 2021,
                month: 1,
                day,
            },
            1,
        )
    }

    fn points(n: usize) -> Arc<Vec<DataPoint>> {
        Arc::new(
            (0..n)
                .map(|i| DataPoint::new(i as u32, Value::F64(i as f64)))
                .collect(),
        )
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = PointCache::new(10, 1 << 20);

        assert!(cache.get(key(1), 5).is_none());

        let stream = points(3);
        cache.insert(key(1), 5, Arc::clone(&stream));

        let hit = cache.get(key(1), 5).unwrap();
        assert!(Arc::ptr_eq(&hit, &stream));
        assert!(cache.get(key(1), 6).is_none());
        assert!(cache.get(key(2), 5).is_none());
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = PointCache::new(10, 1 << 20);
        cache.insert(key(1), 5, points(3));

        cache.invalidate(key(1), 5);
        assert!(cache.get(key(1), 5).is_none());
        assert_eq!(cache.cost_bytes(), 0);
    }

    #[test]
    fn test_entry_cap_evicts_lru() {
        let cache = PointCache::new(2, 1 << 20);
        cache.insert(key(1), 1, points(1));
        cache.insert(key(2), 1, points(1));

        // Touch day 1 so day 2 is now least recently used
        cache.get(key(1), 1).unwrap();
        cache.insert(key(3), 1, points(1));

        assert!(cache.get(key(1), 1).is_some());
        assert!(cache.get(key(2), 1).is_none());
        assert!(cache.get(key(3), 1).is_some());
    }

    #[test]
    fn test_byte_budget_evicts() {
        let one_entry_cost = PointCache::entry_cost(&points(100));
        let cache = PointCache::new(100, one_entry_cost * 2);

        cache.insert(key(1), 1, points(100));
        cache.insert(key(2), 1, points(100));
        cache.insert(key(3), 1, points(100));

        assert_eq!(cache.len(), 2);
        assert!(cache.cost_bytes() <= one_entry_cost * 2);
        assert!(cache.get(key(1), 1).is_none());
    }

    #[test]
    fn test_reinsert_replaces_cost() {
        let cache = PointCache::new(10, 1 << 20);
        cache.insert(key(1), 1, points(100));
        let big = cache.cost_bytes();

        cache.insert(key(1), 1, points(1));
        assert!(cache.cost_bytes() < big);
        assert_eq!(cache.len(), 1);
    }
}
