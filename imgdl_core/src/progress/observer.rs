use async_trait::async_trait;

use crate::types::types::ResourceKey;

/// Trait for anything that wants to know when a resource finished loading.
///
/// Observers are held by non-owning reference: the `DownloadNotifier` never
/// keeps one alive, and a dropped observer is silently skipped.
///
/// `on_download_completed` runs inside the fetch-completion task, only after
/// a successful decode has been cached. Observers that drive a UI must hop to
/// their own execution context.
#[async_trait]
pub trait DownloadObserver: Send + Sync + 'static {
    async fn on_download_completed(&self, key: &ResourceKey);
}
