use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use crate::cache::store::SoftStore;
use crate::types::types::{Progress, ResourceKey};

/// One download attempt for a key.
///
/// Only `progress` changes after creation; the completion path mutates it in
/// place through the shared `Arc`.
#[derive(Debug)]
pub struct DownloadTask {
    pub key: ResourceKey,
    /// Identifies this attempt among all attempts for the same key.
    pub id: Uuid,
    progress: RwLock<Progress>,
}

impl DownloadTask {
    pub fn new(key: ResourceKey, progress: Progress) -> Self {
        Self {
            key,
            id: Uuid::new_v4(),
            progress: RwLock::new(progress),
        }
    }

    pub fn progress(&self) -> Progress {
        *self.progress.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_progress(&self, progress: Progress) {
        *self.progress.write().unwrap_or_else(PoisonError::into_inner) = progress;
    }
}

/// Current (or last known) attempt per key. Soft, like `ResultCache`, and
/// never consulted to infer anything about the result cache.
pub struct TaskRegistry {
    store: SoftStore<Arc<DownloadTask>>,
}

impl TaskRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            store: SoftStore::new("task_registry", capacity),
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Arc<DownloadTask>> {
        self.store.get(key)
    }

    /// Register `task` as the current attempt, discarding any previous one.
    /// The discarded attempt is not cancelled.
    pub fn put(&self, task: Arc<DownloadTask>) {
        self.store.put(task.key.clone(), task);
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_replaces_previous_attempt() {
        let registry = TaskRegistry::new(4);
        let key = ResourceKey::parse("https://example.com/a.png").unwrap();

        let first = Arc::new(DownloadTask::new(key.clone(), Progress::Started));
        registry.put(first.clone());
        let second = Arc::new(DownloadTask::new(key.clone(), Progress::Started));
        registry.put(second.clone());

        let current = registry.get(&key).unwrap();
        assert_eq!(current.id, second.id);
        assert_ne!(current.id, first.id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_progress_mutates_in_place() {
        let registry = TaskRegistry::new(4);
        let key = ResourceKey::parse("https://example.com/a.png").unwrap();
        let task = Arc::new(DownloadTask::new(key.clone(), Progress::Started));
        registry.put(task.clone());

        task.set_progress(Progress::Finished);
        assert_eq!(registry.get(&key).unwrap().progress(), Progress::Finished);
    }
}
