//! Bounded, thread-safe key/value store shared by the result cache and the
//! task registry.
//!
//! Entries may disappear at any time (capacity eviction, explicit removal), so
//! callers must treat a miss the same whether the key was never stored or was
//! evicted. Eviction is least-recently-used, which keeps behavior reproducible.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::types::types::ResourceKey;

pub struct SoftStore<V> {
    name: &'static str,
    entries: Mutex<LruCache<ResourceKey, V>>,
}

impl<V: Clone> SoftStore<V> {
    /// Create a store holding at most `capacity` entries (minimum 1).
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    // A panicking observer must not wedge the stores; recover the guard.
    fn lock(&self) -> MutexGuard<'_, LruCache<ResourceKey, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&self, key: &ResourceKey) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Insert or replace the value for `key`.
    pub fn put(&self, key: ResourceKey, value: V) {
        let mut entries = self.lock();
        if let Some((evicted, _)) = entries.push(key.clone(), value) {
            if evicted != key {
                log::debug!("[{}] evicted key={}", self.name, evicted);
            }
        }
    }

    pub fn remove(&self, key: &ResourceKey) -> Option<V> {
        self.lock().pop(key)
    }

    /// Membership test that does not touch recency.
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
