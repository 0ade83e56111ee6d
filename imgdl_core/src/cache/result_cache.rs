use std::sync::Arc;

use crate::cache::store::SoftStore;
use crate::types::types::ResourceKey;

/// A decoded payload that completed successfully for `key`.
///
/// Entries are never updated in place; a later success for the same key
/// replaces the whole entry.
#[derive(Debug)]
pub struct CacheEntry<P> {
    pub key: ResourceKey,
    pub payload: Arc<P>,
}

/// Decoded results keyed by resource. Soft: any entry may be evicted.
pub struct ResultCache<P> {
    store: SoftStore<Arc<CacheEntry<P>>>,
}

impl<P> ResultCache<P> {
    pub fn new(capacity: usize) -> Self {
        Self {
            store: SoftStore::new("result_cache", capacity),
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Arc<CacheEntry<P>>> {
        self.store.get(key)
    }

    pub fn put(&self, key: ResourceKey, payload: P) {
        let entry = Arc::new(CacheEntry {
            key: key.clone(),
            payload: Arc::new(payload),
        });
        self.store.put(key, entry);
    }

    /// Drop the entry for `key`, as the eviction policy would.
    pub fn evict(&self, key: &ResourceKey) -> bool {
        self.store.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    pub fn clear(&self) {
        self.store.clear();
    }
}
