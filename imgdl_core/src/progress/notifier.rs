use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::observer::DownloadObserver;
use crate::types::types::ResourceKey;

/// Handle returned by `DownloadNotifier::add`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "dropping a Subscription keeps the observer registered; keep it to unsubscribe"]
pub struct Subscription(u64);

struct Registration {
    id: u64,
    observer: Weak<dyn DownloadObserver>,
}

/// Multicast fan-out of completion events to weakly held observers.
///
/// | Call               | Effect                                             |
/// |--------------------|----------------------------------------------------|
/// | `add`              | registers a non-owning reference, returns a token  |
/// | `remove`           | drops every registration of that observer          |
/// | `unsubscribe`      | drops the registration behind a token              |
/// | `invoke(key)`      | newest-first `on_download_completed(key)` calls    |
pub struct DownloadNotifier {
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl Default for DownloadNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadNotifier {
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, observer: &Arc<dyn DownloadObserver>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registrations = self.lock();
        registrations.retain(|r| r.observer.strong_count() > 0);
        registrations.push(Registration {
            id,
            observer: Arc::downgrade(observer),
        });
        Subscription(id)
    }

    /// Remove `observer` by identity. Returns whether anything was removed.
    pub fn remove(&self, observer: &Arc<dyn DownloadObserver>) -> bool {
        let target = Arc::as_ptr(observer) as *const ();
        let mut registrations = self.lock();
        let before = registrations.len();
        registrations.retain(|r| r.observer.as_ptr() as *const () != target);
        registrations.len() != before
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut registrations = self.lock();
        let before = registrations.len();
        registrations.retain(|r| r.id != subscription.0);
        registrations.len() != before
    }

    /// Number of registrations whose observer is still alive.
    pub fn len(&self) -> usize {
        self.lock()
            .iter()
            .filter(|r| r.observer.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every live observer, newest registration first.
    ///
    /// The observer list is snapshotted before any callback runs, so an
    /// observer may add or remove registrations from inside its callback.
    pub async fn invoke(&self, key: &ResourceKey) {
        let live: Vec<Arc<dyn DownloadObserver>> = {
            let mut registrations = self.lock();
            registrations.retain(|r| r.observer.strong_count() > 0);
            registrations
                .iter()
                .rev()
                .filter_map(|r| r.observer.upgrade())
                .collect()
        };

        log::debug!("[notifier] key={} observers={}", key, live.len());
        for observer in live {
            observer.on_download_completed(key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<(&'static str, String)>>>,
    }

    #[async_trait]
    impl DownloadObserver for Recorder {
        async fn on_download_completed(&self, key: &ResourceKey) {
            self.log.lock().unwrap().push((self.name, key.to_string()));
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<(&'static str, String)>>>,
    ) -> Arc<dyn DownloadObserver> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
        })
    }

    fn key() -> ResourceKey {
        ResourceKey::parse("https://example.com/cat.png").unwrap()
    }

    #[tokio::test]
    async fn test_invoke_runs_in_reverse_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = DownloadNotifier::new();
        let a = recorder("a", &log);
        let b = recorder("b", &log);
        let c = recorder("c", &log);
        let _ = notifier.add(&a);
        let _ = notifier.add(&b);
        let _ = notifier.add(&c);

        notifier.invoke(&key()).await;

        let names: Vec<_> = log.lock().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_notifier_does_not_keep_observer_alive() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = DownloadNotifier::new();
        let a = recorder("a", &log);
        let _ = notifier.add(&a);
        assert_eq!(Arc::strong_count(&a), 1);

        drop(a);
        assert!(notifier.is_empty());

        notifier.invoke(&key()).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_add_prunes_dropped_registrations() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = DownloadNotifier::new();
        for _ in 0..100 {
            let short_lived = recorder("short", &log);
            let _ = notifier.add(&short_lived);
        }
        let kept = recorder("kept", &log);
        let _ = notifier.add(&kept);

        assert_eq!(notifier.lock().len(), 1);
        assert_eq!(notifier.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_by_identity_only_drops_that_observer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = DownloadNotifier::new();
        let a = recorder("a", &log);
        let b = recorder("b", &log);
        let _ = notifier.add(&a);
        let _ = notifier.add(&b);

        assert!(notifier.remove(&a));
        assert!(!notifier.remove(&a));

        notifier.invoke(&key()).await;
        let names: Vec<_> = log.lock().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_with_token() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = DownloadNotifier::new();
        let a = recorder("a", &log);
        let sub = notifier.add(&a);

        assert!(notifier.unsubscribe(sub));
        assert!(!notifier.unsubscribe(sub));

        notifier.invoke(&key()).await;
        assert!(log.lock().unwrap().is_empty());
    }

    struct SelfRemover {
        notifier: Arc<DownloadNotifier>,
        me: Mutex<Option<Subscription>>,
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl DownloadObserver for SelfRemover {
        async fn on_download_completed(&self, _key: &ResourceKey) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = self.me.lock().unwrap().take() {
                self.notifier.unsubscribe(sub);
            }
        }
    }

    #[tokio::test]
    async fn test_observer_can_unsubscribe_during_invoke() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(DownloadNotifier::new());
        let calls = Arc::new(AtomicU64::new(0));

        let first = recorder("first", &log);
        let _ = notifier.add(&first);

        let remover = Arc::new(SelfRemover {
            notifier: Arc::clone(&notifier),
            me: Mutex::new(None),
            calls: Arc::clone(&calls),
        });
        let as_observer: Arc<dyn DownloadObserver> = remover.clone();
        let sub = notifier.add(&as_observer);
        *remover.me.lock().unwrap() = Some(sub);

        notifier.invoke(&key()).await;
        notifier.invoke(&key()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
