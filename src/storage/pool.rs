//! Storage pool: keyed, lazily-populated cache of open engines
//!
//! One engine exists per `(date, counter)` ever touched, but only a handful
//! are hot at any time (the current day, recently queried days). The pool
//! opens engines on demand and a periodic sweep closes any engine that was
//! not accessed since the previous sweep, keeping memory and file-descriptor
//! usage bounded without a fixed-size LRU.

use crate::storage::engine::{EngineOptions, StorageEngine};
use crate::storage::error::StorageResult;
use crate::storage::types::StorageKey;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct PoolState {
    engines: HashMap<StorageKey, Arc<StorageEngine>>,
    access_counts: HashMap<StorageKey, u64>,
}

/// Cache of open storage engines keyed by `StorageKey`.
pub struct StoragePool {
    root: PathBuf,
    options: EngineOptions,
    state: Mutex<PoolState>,
}

impl StoragePool {
    pub fn new(root: impl Into<PathBuf>, options: EngineOptions) -> Self {
        Self {
            root: root.into(),
            options,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Get the engine for `key`, opening (and optionally creating) it on
    /// first access. Bumps the key's access count.
    pub fn get(&self, key: StorageKey, create_if_missing: bool) -> StorageResult<Arc<StorageEngine>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(engine) = state.engines.get(&key) {
            let engine = Arc::clone(engine);
            *state.access_counts.entry(key).or_insert(0) += 1;
            return Ok(engine);
        }

        let path = self.root.join(key.dir_path());
        let engine = Arc::new(StorageEngine::open(path, self.options, create_if_missing)?);

        state.engines.insert(key, Arc::clone(&engine));
        state.access_counts.insert(key, 1);

        tracing::info!(%key, "loaded storage into pool");

        Ok(engine)
    }

    /// Close and evict every engine not accessed since the previous sweep,
    /// and reset access counts for the survivors.
    pub fn sweep(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let idle: Vec<StorageKey> = state
            .engines
            .keys()
            .filter(|key| state.access_counts.get(key).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        for key in idle {
            if let Some(engine) = state.engines.remove(&key) {
                engine.close();
                state.access_counts.remove(&key);
                tracing::info!(%key, "closed idle storage");
            }
        }

        for count in state.access_counts.values_mut() {
            *count = 0;
        }
    }

    /// Flush dirty indexes of every open engine.
    pub fn sync_all(&self) {
        let engines: Vec<Arc<StorageEngine>> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.engines.values().cloned().collect()
        };

        for engine in engines {
            if let Err(e) = engine.sync_indexes() {
                tracing::error!(path = ?engine.path(), error = %e, "index sync failed");
            }
        }
    }

    /// Close every open engine. Used at shutdown.
    pub fn close_all(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        for (key, engine) in state.engines.drain() {
            engine.close();
            tracing::debug!(%key, "closed storage");
        }
        state.access_counts.clear();
    }

    /// Number of currently open engines.
    pub fn open_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .engines
            .len()
    }
}
