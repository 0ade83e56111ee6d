use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use image::GenericImageView;
use serde::Serialize;

use imgdl_core::downloader::transport::Transport;
use imgdl_core::types::types::FetchResponse;
use imgdl_core::{DownloadError, DownloadObserver, ImageDownloader, Progress, ResourceKey};

use crate::terminal_observer::TerminalObserver;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Consecutive idle polls before a key with no task and no fetch on the wire
/// is given up on. Covers the gap between the transport returning and the
/// decoded result reaching the cache.
const EVICTION_GRACE_POLLS: u32 = 20;

/// Wraps a `Transport` and counts the fetches currently on the wire per key.
///
/// The task registry forgets attempts under pressure, so `progress_for` alone
/// cannot tell "evicted but still fetching" from "evicted and gone".
pub struct TrackedTransport {
    inner: Arc<dyn Transport>,
    in_flight: Mutex<HashMap<ResourceKey, usize>>,
}

impl TrackedTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn counts(&self) -> MutexGuard<'_, HashMap<ResourceKey, usize>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_flight(&self, key: &ResourceKey) -> usize {
        self.counts().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for TrackedTransport {
    async fn fetch(&self, key: &ResourceKey) -> Result<FetchResponse, DownloadError> {
        *self.counts().entry(key.clone()).or_insert(0) += 1;
        let result = self.inner.fetch(key).await;

        let mut counts = self.counts();
        if let Some(count) = counts.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                counts.remove(key);
            }
        }
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A completion event arrived; the image was decoded and cached.
    Loaded,
    /// The attempt settled as `FinishedWithError`.
    Failed,
    /// The attempt was dropped from the task registry and never reported back.
    Evicted,
}

#[derive(Debug, Clone)]
pub struct KeyReport {
    pub key: ResourceKey,
    pub outcome: Outcome,
    pub dimensions: Option<(u32, u32)>,
}

/// Request every key once and wait until each one is loaded, failed or lost.
///
/// Nothing here calls `request_resource` after the initial round, so waiting
/// never starts a second fetch.
pub async fn load_all(
    downloader: &ImageDownloader,
    transport: &TrackedTransport,
    terminal: &Arc<TerminalObserver>,
    keys: &[ResourceKey],
) -> Vec<KeyReport> {
    let observer: Arc<dyn DownloadObserver> = terminal.clone();
    let subscription = downloader.add_observer(&observer);

    for key in keys {
        if let Some(image) = downloader.request_resource(key) {
            terminal.record_loaded(key, Some(image.dimensions()));
        }
    }

    let mut settled: HashMap<&ResourceKey, Outcome> = HashMap::new();
    let mut idle: HashMap<&ResourceKey, u32> = HashMap::new();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    while settled.len() < keys.len() {
        ticker.tick().await;
        for key in keys {
            if settled.contains_key(key) {
                continue;
            }
            if terminal.loaded(key).is_some() {
                settled.insert(key, Outcome::Loaded);
                continue;
            }
            match downloader.progress_for(key) {
                Progress::FinishedWithError => {
                    terminal.record_failure(key);
                    settled.insert(key, Outcome::Failed);
                }
                // `Finished` without our event yet: the notifier is still fanning out.
                Progress::Started | Progress::Finished => {
                    idle.remove(key);
                }
                Progress::NotStarted if transport.in_flight(key) > 0 => {
                    idle.remove(key);
                }
                Progress::NotStarted => {
                    let polls = idle.entry(key).or_insert(0);
                    *polls += 1;
                    if *polls >= EVICTION_GRACE_POLLS {
                        log::warn!("[batch] {} was evicted before it reported back", key);
                        terminal.record_evicted(key);
                        settled.insert(key, Outcome::Evicted);
                    }
                }
            }
        }
    }

    downloader.unsubscribe(subscription);

    keys.iter()
        .map(|key| {
            let outcome = settled.get(key).copied().unwrap_or(Outcome::Evicted);
            let dimensions = match outcome {
                Outcome::Loaded => terminal.loaded(key).flatten(),
                _ => None,
            };
            KeyReport {
                key: key.clone(),
                outcome,
                dimensions,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{DynamicImage, ImageFormat, RgbaImage};
    use indicatif::ProgressBar;

    use imgdl_core::DownloaderConfig;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::new(width, height))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    /// Answers every request after `delay` with `status` and a 3x2 PNG.
    struct SlowTransport {
        delay: Duration,
        status: u16,
        calls: AtomicUsize,
    }

    impl SlowTransport {
        fn new(delay: Duration, status: u16) -> Self {
            Self {
                delay,
                status,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for SlowTransport {
        async fn fetch(&self, _key: &ResourceKey) -> Result<FetchResponse, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(FetchResponse::new(self.status, png_bytes(3, 2)))
        }
    }

    struct Harness {
        downloader: Arc<ImageDownloader>,
        tracked: Arc<TrackedTransport>,
        terminal: Arc<TerminalObserver>,
    }

    fn harness(config: DownloaderConfig, transport: Arc<SlowTransport>) -> Harness {
        let tracked = Arc::new(TrackedTransport::new(transport));
        let downloader = Arc::new(
            ImageDownloader::builder()
                .with_config(config)
                .with_transport(tracked.clone())
                .build()
                .unwrap(),
        );
        let terminal = Arc::new(TerminalObserver::with_bar(
            downloader.clone(),
            ProgressBar::hidden(),
        ));
        Harness {
            downloader,
            tracked,
            terminal,
        }
    }

    fn keys(n: usize) -> Vec<ResourceKey> {
        (0..n)
            .map(|i| ResourceKey::parse(&format!("https://img.example.com/{}.png", i)).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_evicted_task_waits_for_its_completion_without_refetching() {
        let transport = Arc::new(SlowTransport::new(Duration::from_millis(150), 200));
        let config = DownloaderConfig {
            task_registry_capacity: 1,
            ..Default::default()
        };
        let h = harness(config, transport.clone());
        let keys = keys(2);

        let reports = load_all(&h.downloader, &h.tracked, &h.terminal, &keys).await;

        assert_eq!(reports.len(), 2);
        for report in &reports {
            assert_eq!(report.outcome, Outcome::Loaded, "{}", report.key);
            assert_eq!(report.dimensions, Some((3, 2)), "{}", report.key);
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        // The first key's task was pushed out by the second request.
        assert_eq!(h.downloader.progress_for(&keys[0]), Progress::NotStarted);
    }

    #[tokio::test]
    async fn test_result_evicted_from_cache_is_still_reported_loaded() {
        let transport = Arc::new(SlowTransport::new(Duration::from_millis(20), 200));
        let config = DownloaderConfig {
            result_cache_capacity: 1,
            ..Default::default()
        };
        let h = harness(config, transport.clone());
        let keys = keys(3);

        let reports = load_all(&h.downloader, &h.tracked, &h.terminal, &keys).await;

        assert!(reports.iter().all(|r| r.outcome == Outcome::Loaded));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.downloader.result_cache().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_status_is_reported_failed_once() {
        let transport = Arc::new(SlowTransport::new(Duration::from_millis(20), 404));
        let h = harness(DownloaderConfig::default(), transport.clone());
        let keys = keys(2);

        let reports = load_all(&h.downloader, &h.tracked, &h.terminal, &keys).await;

        for report in &reports {
            assert_eq!(report.outcome, Outcome::Failed);
            assert_eq!(report.dimensions, None);
        }
        // Waiting on a failed attempt must not start a retry.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_evicted_failure_is_reported_evicted_not_failed() {
        let transport = Arc::new(SlowTransport::new(Duration::from_millis(20), 404));
        let config = DownloaderConfig {
            task_registry_capacity: 1,
            ..Default::default()
        };
        let h = harness(config, transport.clone());
        let keys = keys(2);

        let reports = load_all(&h.downloader, &h.tracked, &h.terminal, &keys).await;

        assert_eq!(reports[0].outcome, Outcome::Evicted);
        assert_eq!(reports[1].outcome, Outcome::Failed);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tracked_transport_counts_fetches_on_the_wire() {
        let slow = Arc::new(SlowTransport::new(Duration::from_millis(100), 200));
        let tracked = Arc::new(TrackedTransport::new(slow));
        let key = keys(1).remove(0);

        let handle = {
            let tracked = tracked.clone();
            let key = key.clone();
            tokio::spawn(async move { tracked.fetch(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(tracked.in_flight(&key), 1);

        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(tracked.in_flight(&key), 0);
    }
}
