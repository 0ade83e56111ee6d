use std::sync::Arc;

use tokio::runtime::Handle;

use crate::cache::result_cache::ResultCache;
use crate::cache::task_registry::TaskRegistry;
use crate::config::DownloaderConfig;
use crate::downloader::decoder::{ImageDecoder, PayloadDecoder};
use crate::downloader::fetcher::Fetcher;
use crate::downloader::transport::{HttpTransport, Transport};
use crate::progress::notifier::{DownloadNotifier, Subscription};
use crate::progress::observer::DownloadObserver;
use crate::types::types::{DownloadError, Progress, ResourceKey};

/// Fetch/dedup/cache orchestrator.
///
/// Construct one per process with [`ImageDownloader::builder`] and share it
/// by `Arc`. `request_resource` never blocks on the network: it either returns
/// a cached payload or returns `None` (possibly after starting a fetch), and
/// observers are told when a fetch lands in the cache.
pub struct ImageDownloader<D: PayloadDecoder = ImageDecoder> {
    results: Arc<ResultCache<D::Output>>,
    tasks: Arc<TaskRegistry>,
    notifier: Arc<DownloadNotifier>,
    fetcher: Fetcher<D>,
}

pub struct ImageDownloaderBuilder<D: PayloadDecoder = ImageDecoder> {
    config: DownloaderConfig,
    transport: Option<Arc<dyn Transport>>,
    decoder: D,
    runtime: Option<Handle>,
}

impl ImageDownloader<ImageDecoder> {
    pub fn builder() -> ImageDownloaderBuilder<ImageDecoder> {
        ImageDownloaderBuilder::new()
    }
}

impl<D: PayloadDecoder> ImageDownloader<D> {
    /// Return the cached payload for `key`, or `None` while it is unavailable.
    ///
    /// Branch order:
    /// 1. cached result: restart the fetch if the registered attempt failed,
    ///    otherwise return the result;
    /// 2. no cached result and no attempt: start a fetch;
    /// 3. no cached result but an attempt: restart only if it failed.
    ///
    /// Two calls racing on a never-seen key may both start a fetch; once an
    /// attempt is registered, later calls are deduplicated.
    pub fn request_resource(&self, key: &ResourceKey) -> Option<Arc<D::Output>> {
        if let Some(entry) = self.results.get(key) {
            if let Some(task) = self.tasks.get(key) {
                if task.progress() == Progress::FinishedWithError {
                    log::debug!(
                        "[downloader] key={}: cached but last attempt failed, refetching",
                        key
                    );
                    self.fetcher.start_fetch(key);
                    return None;
                }
            }
            log::debug!("[downloader] key={}: cache hit", key);
            return Some(Arc::clone(&entry.payload));
        }

        match self.tasks.get(key) {
            None => {
                self.fetcher.start_fetch(key);
            }
            Some(task) => {
                let progress = task.progress();
                if progress == Progress::FinishedWithError {
                    log::debug!("[downloader] key={}: last attempt failed, refetching", key);
                    self.fetcher.start_fetch(key);
                } else {
                    log::debug!(
                        "[downloader] key={}: attempt {} is {:?}, not refetching",
                        key,
                        task.id,
                        progress
                    );
                }
            }
        }
        None
    }

    /// Parse `url` and request it. An invalid URL starts nothing.
    pub fn request(&self, url: &str) -> Result<Option<Arc<D::Output>>, DownloadError> {
        let key = ResourceKey::parse(url)?;
        Ok(self.request_resource(&key))
    }

    /// Progress of the registered attempt, `NotStarted` when there is none.
    pub fn progress_for(&self, key: &ResourceKey) -> Progress {
        self.tasks
            .get(key)
            .map(|task| task.progress())
            .unwrap_or(Progress::NotStarted)
    }

    /// Register `observer` without taking ownership of it.
    pub fn add_observer(&self, observer: &Arc<dyn DownloadObserver>) -> Subscription {
        self.notifier.add(observer)
    }

    pub fn remove_observer(&self, observer: &Arc<dyn DownloadObserver>) -> bool {
        self.notifier.remove(observer)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.notifier.unsubscribe(subscription)
    }

    /// Returns a reference to the result cache (for testing/inspection).
    pub fn result_cache(&self) -> &Arc<ResultCache<D::Output>> {
        &self.results
    }

    /// Returns a reference to the task registry (for testing/inspection).
    pub fn task_registry(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }
}

impl ImageDownloaderBuilder<ImageDecoder> {
    pub fn new() -> Self {
        Self {
            config: DownloaderConfig::default(),
            transport: None,
            decoder: ImageDecoder,
            runtime: None,
        }
    }
}

impl Default for ImageDownloaderBuilder<ImageDecoder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: PayloadDecoder> ImageDownloaderBuilder<D> {
    pub fn with_config(mut self, config: DownloaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default `HttpTransport`.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_decoder<D2: PayloadDecoder>(self, decoder: D2) -> ImageDownloaderBuilder<D2> {
        ImageDownloaderBuilder {
            config: self.config,
            transport: self.transport,
            decoder,
            runtime: self.runtime,
        }
    }

    /// Run fetches on `runtime` instead of the runtime current at `build()`.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<ImageDownloader<D>, DownloadError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| DownloadError::NoRuntime)?,
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };

        let results = Arc::new(ResultCache::new(self.config.result_cache_capacity));
        let tasks = Arc::new(TaskRegistry::new(self.config.task_registry_capacity));
        let notifier = Arc::new(DownloadNotifier::new());
        let fetcher = Fetcher::new(
            transport,
            Arc::new(self.decoder),
            Arc::clone(&results),
            Arc::clone(&tasks),
            Arc::clone(&notifier),
            runtime,
        );

        log::debug!(
            "[downloader] built: result_cache_capacity={}, task_registry_capacity={}",
            results.capacity(),
            tasks.capacity()
        );

        Ok(ImageDownloader {
            results,
            tasks,
            notifier,
            fetcher,
        })
    }
}
