use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::DownloaderConfig;
use crate::types::types::{DownloadError, FetchResponse, ResourceKey};

/// Network capability used by the fetcher: one request, one response.
///
/// Any `Err` is a transport-level failure. A response with an error status is
/// still `Ok`; classifying status codes is the fetcher's job.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn fetch(&self, key: &ResourceKey) -> Result<FetchResponse, DownloadError>;
}

/// `Transport` backed by a shared `reqwest::Client`.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_nodelay(true);
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, key: &ResourceKey) -> Result<FetchResponse, DownloadError> {
        let response = self.client.get(key.as_str()).send().await?;
        let status = response.status().as_u16();
        let content_length = response.content_length();
        log::debug!(
            "[http_transport] key={}: status={}, content_length={:?}",
            key,
            status,
            content_length
        );

        // A body that fails mid-stream counts as a transport failure.
        let body = response.bytes().await?;
        Ok(FetchResponse::new(status, body.to_vec()))
    }
}
