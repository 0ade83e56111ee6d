use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Normalized URL identifying one fetchable resource.
///
/// Both stores are keyed by this type. Two keys are equal when their
/// normalized string forms are equal, so `HTTP://Example.com/a.png` and
/// `http://example.com/a.png` share a cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Parse and normalize `text`. Only absolute `http`/`https` URLs with a
    /// host are accepted.
    pub fn parse(text: &str) -> Result<Self, DownloadError> {
        let trimmed = text.trim();
        let url = Url::parse(trimmed)
            .map_err(|e| DownloadError::InvalidKey(format!("{}: {}", trimmed, e)))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(DownloadError::InvalidKey(format!(
                    "{}: unsupported scheme '{}'",
                    trimmed, other
                )))
            }
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(DownloadError::InvalidKey(format!("{}: missing host", trimmed)));
        }

        Ok(Self(url.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceKey {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle of a single download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    NotStarted,
    Started,
    Finished,
    FinishedWithError,
}

impl Progress {
    /// True once the attempt has reached a terminal state.
    pub fn is_settled(self) -> bool {
        matches!(self, Progress::Finished | Progress::FinishedWithError)
    }
}

/// Raw outcome of a transport round-trip that produced a response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid resource key: {0}")]
    InvalidKey(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no tokio runtime available to run fetches on")]
    NoRuntime,
}
