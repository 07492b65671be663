// src/cache/worker.rs

//! Process-lived cache for worker task values.
//!
//! Workers are long-lived in-memory singletons (compiler daemons, watch
//! services). They are identity-cached on their inputs hash: an entry is
//! reused only while the recorded hash matches, and is replaced wholesale
//! when it does not. Entries are keyed by the worker's rendered segments;
//! the scheduler never runs two groups with equal segments concurrently,
//! so no two worker bodies race on one entry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::model::TaskValue;

/// Cloneable handle to the shared worker map. Keep one per process and
/// pass it to every evaluator so workers survive across runs.
#[derive(Clone, Default)]
pub struct WorkerCache {
    inner: Arc<Mutex<HashMap<String, (i32, TaskValue)>>>,
}

impl WorkerCache {
    pub fn new() -> Self {
        WorkerCache::default()
    }

    /// The cached value for `segments`, if its inputs hash still matches.
    pub fn get(&self, segments: &str, inputs_hash: i32) -> Option<TaskValue> {
        let guard = self.inner.lock().ok()?;
        match guard.get(segments) {
            Some((stored_hash, value)) if *stored_hash == inputs_hash => Some(value.clone()),
            _ => None,
        }
    }

    pub fn put(&self, segments: &str, inputs_hash: i32, value: TaskValue) {
        if let Ok(mut guard) = self.inner.lock() {
            debug!(worker = %segments, inputs_hash, "stored worker value");
            guard.insert(segments.to_string(), (inputs_hash, value));
        }
    }

    /// Drop entries whose segments no longer exist in the current graph.
    pub fn evict_stale(&self, live: &HashSet<String>) {
        if let Ok(mut guard) = self.inner.lock() {
            let before = guard.len();
            guard.retain(|segments, _| live.contains(segments));
            let removed = before - guard.len();
            if removed > 0 {
                debug!(removed, "evicted stale worker entries");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{value, value_as};

    #[test]
    fn hit_requires_exact_hash() {
        let cache = WorkerCache::new();
        cache.put("app.zinc", 10, value(42i32));

        let hit = cache.get("app.zinc", 10).unwrap();
        assert_eq!(value_as::<i32>(&hit), Some(&42));
        assert!(cache.get("app.zinc", 11).is_none());
        assert!(cache.get("app.other", 10).is_none());
    }

    #[test]
    fn identity_is_preserved_across_hits() {
        let cache = WorkerCache::new();
        let original = value(String::from("daemon"));
        cache.put("app.daemon", 5, original.clone());

        let hit = cache.get("app.daemon", 5).unwrap();
        assert!(Arc::ptr_eq(&original, &hit));
    }

    #[test]
    fn evict_stale_keeps_only_live_segments() {
        let cache = WorkerCache::new();
        cache.put("keep.me", 1, value(1i32));
        cache.put("drop.me", 2, value(2i32));

        let live: HashSet<String> = ["keep.me".to_string()].into_iter().collect();
        cache.evict_stale(&live);

        assert_eq!(cache.len(), 1);
        assert!(cache.get("keep.me", 1).is_some());
        assert!(cache.get("drop.me", 2).is_none());
    }
}
