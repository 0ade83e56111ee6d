use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use image::GenericImageView;
use indicatif::{ProgressBar, ProgressStyle};

use imgdl_core::{DownloadObserver, ImageDownloader, ResourceKey};

/// Shows one bar for the whole batch, ticking it forward each time a
/// resource lands in the cache, and remembers what each completion decoded
/// to so the batch can be reported without asking the downloader again.
pub struct TerminalObserver {
    bar: ProgressBar,
    downloader: Arc<ImageDownloader>,
    /// key → decoded dimensions, `None` if the result was already evicted
    completed: Mutex<HashMap<ResourceKey, Option<(u32, u32)>>>,
}

impl TerminalObserver {
    pub fn new(downloader: Arc<ImageDownloader>, total: u64) -> Self {
        let bar = ProgressBar::new(total);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        Self::with_bar(downloader, bar)
    }

    pub fn with_bar(downloader: Arc<ImageDownloader>, bar: ProgressBar) -> Self {
        Self {
            bar,
            downloader,
            completed: Mutex::new(HashMap::new()),
        }
    }

    fn completed(&self) -> MutexGuard<'_, HashMap<ResourceKey, Option<(u32, u32)>>> {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a resource that is available in the cache.
    pub fn record_loaded(&self, key: &ResourceKey, dimensions: Option<(u32, u32)>) {
        if self.completed().insert(key.clone(), dimensions).is_none() {
            self.bar.inc(1);
            self.bar.set_message(key.to_string());
        }
    }

    /// Count a resource that settled without a completion event.
    pub fn record_failure(&self, key: &ResourceKey) {
        self.bar.inc(1);
        self.bar.println(format!("failed: {}", key));
    }

    pub fn record_evicted(&self, key: &ResourceKey) {
        self.bar.inc(1);
        self.bar.println(format!("evicted: {}", key));
    }

    /// `Some` once a completion event was seen for `key`.
    pub fn loaded(&self, key: &ResourceKey) -> Option<Option<(u32, u32)>> {
        self.completed().get(key).copied()
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[async_trait]
impl DownloadObserver for TerminalObserver {
    async fn on_download_completed(&self, key: &ResourceKey) {
        // Read the cache directly: asking `request_resource` could start a fetch.
        let dimensions = self
            .downloader
            .result_cache()
            .get(key)
            .map(|entry| entry.payload.dimensions());
        self.record_loaded(key, dimensions);
    }
}
