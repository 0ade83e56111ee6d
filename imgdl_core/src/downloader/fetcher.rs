use std::sync::Arc;

use tokio::runtime::Handle;

use crate::cache::result_cache::ResultCache;
use crate::cache::task_registry::{DownloadTask, TaskRegistry};
use crate::downloader::decoder::PayloadDecoder;
use crate::downloader::transport::Transport;
use crate::progress::notifier::DownloadNotifier;
use crate::types::types::{DownloadError, FetchResponse, Progress, ResourceKey};

/// How a response status is treated before any decoding happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 401. Terminal error, body ignored.
    Unauthorized,
    /// 400 and 404. Terminal error, body ignored.
    Rejected,
    /// Every other status, including other 4xx/5xx, goes on to decode.
    Decode,
}

/// Classify a response status.
///
/// Only 400, 401 and 404 are rejected up front. Other error statuses still
/// have their body decoded, so a server that returns an image with a 500
/// status produces a cached result.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        401 => StatusClass::Unauthorized,
        400 | 404 => StatusClass::Rejected,
        _ => StatusClass::Decode,
    }
}

/// Starts fetches and applies their single terminal outcome to the stores.
pub struct Fetcher<D: PayloadDecoder> {
    transport: Arc<dyn Transport>,
    decoder: Arc<D>,
    results: Arc<ResultCache<D::Output>>,
    tasks: Arc<TaskRegistry>,
    notifier: Arc<DownloadNotifier>,
    runtime: Handle,
}

impl<D: PayloadDecoder> Clone for Fetcher<D> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            decoder: Arc::clone(&self.decoder),
            results: Arc::clone(&self.results),
            tasks: Arc::clone(&self.tasks),
            notifier: Arc::clone(&self.notifier),
            runtime: self.runtime.clone(),
        }
    }
}

impl<D: PayloadDecoder> Fetcher<D> {
    pub fn new(
        transport: Arc<dyn Transport>,
        decoder: Arc<D>,
        results: Arc<ResultCache<D::Output>>,
        tasks: Arc<TaskRegistry>,
        notifier: Arc<DownloadNotifier>,
        runtime: Handle,
    ) -> Self {
        Self {
            transport,
            decoder,
            results,
            tasks,
            notifier,
            runtime,
        }
    }

    /// Register a `Started` attempt for `key`, replacing any previous one,
    /// then run the fetch on the runtime. Returns without waiting.
    pub fn start_fetch(&self, key: &ResourceKey) -> Arc<DownloadTask> {
        let task = Arc::new(DownloadTask::new(key.clone(), Progress::Started));
        self.tasks.put(Arc::clone(&task));
        log::info!("[fetcher] key={} attempt={}: started", key, task.id);

        let fetcher = self.clone();
        let key = key.clone();
        let attempt = task.id;
        self.runtime.spawn(async move {
            let outcome = fetcher.transport.fetch(&key).await;
            fetcher.settle(&key, outcome).await;
            log::debug!("[fetcher] key={} attempt={}: settled", key, attempt);
        });

        task
    }

    async fn settle(&self, key: &ResourceKey, outcome: Result<FetchResponse, DownloadError>) {
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                log::warn!("[fetcher] key={}: transport failure: {}", key, e);
                self.mark(key, Progress::FinishedWithError);
                return;
            }
        };

        match classify_status(response.status) {
            StatusClass::Unauthorized => {
                log::warn!("[fetcher] key={}: unauthorized (401)", key);
                self.mark(key, Progress::FinishedWithError);
                return;
            }
            StatusClass::Rejected => {
                log::warn!(
                    "[fetcher] key={}: rejected with status {}",
                    key,
                    response.status
                );
                self.mark(key, Progress::FinishedWithError);
                return;
            }
            StatusClass::Decode => {}
        }

        // Decoding is CPU bound; keep it off the async workers.
        let decoder = Arc::clone(&self.decoder);
        let body = response.body;
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&body))
            .await
            .map_err(|e| DownloadError::Decode(e.to_string()))
            .and_then(|result| result);

        match decoded {
            Ok(payload) => {
                self.results.put(key.clone(), payload);
                self.mark(key, Progress::Finished);
                log::info!(
                    "[fetcher] key={}: finished (status {})",
                    key,
                    response.status
                );
                self.notifier.invoke(key).await;
            }
            Err(e) => {
                log::warn!("[fetcher] key={}: {}", key, e);
                self.mark(key, Progress::FinishedWithError);
            }
        }
    }

    // The task is looked up again by key instead of using the attempt that
    // started this fetch, so a late outcome lands on whichever attempt is
    // registered now.
    fn mark(&self, key: &ResourceKey, progress: Progress) {
        match self.tasks.get(key) {
            Some(task) => task.set_progress(progress),
            None => log::debug!(
                "[fetcher] key={}: no registered task, {:?} not recorded",
                key,
                progress
            ),
        }
    }
}
