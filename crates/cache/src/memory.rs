//! Memory tier: decoded objects for the lifetime of the process.

use crate::CacheKey;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Decoded-object cache keyed by source location.
///
/// Unbounded: nothing is evicted until [`clear()`](Self::clear). All methods
/// are synchronous and never hold the lock across an `.await`, so it is safe
/// to call from any number of concurrently suspended fetches.
pub struct MemoryCache<T> {
    entries: RwLock<HashMap<CacheKey, Arc<T>>>,
}

impl<T> MemoryCache<T> {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<T>> {
        // A panic while holding the lock cannot leave the map half-updated,
        // so a poisoned lock is still safe to use.
        self.entries.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    pub fn put(&self, key: CacheKey, value: Arc<T>) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).insert(key, value);
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for MemoryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
