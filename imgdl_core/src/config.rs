//! Downloader configuration.
//!
//! Precedence, lowest first: built-in defaults, a JSON file, `IMGDL_*`
//! environment variables. Front ends layer their own flags on top.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::types::DownloadError;

pub const ENV_RESULT_CACHE_CAPACITY: &str = "IMGDL_RESULT_CACHE_CAPACITY";
pub const ENV_TASK_REGISTRY_CAPACITY: &str = "IMGDL_TASK_REGISTRY_CAPACITY";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "IMGDL_CONNECT_TIMEOUT_SECS";
pub const ENV_USER_AGENT: &str = "IMGDL_USER_AGENT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Maximum decoded results kept in memory.
    pub result_cache_capacity: usize,
    /// Maximum download attempts remembered.
    pub task_registry_capacity: usize,
    pub connect_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub user_agent: Option<String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            result_cache_capacity: 256,
            task_registry_capacity: 256,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 8,
            user_agent: None,
        }
    }
}

impl DownloaderConfig {
    /// Read a JSON config file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DownloadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| DownloadError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Overlay values from `IMGDL_*` environment variables.
    pub fn apply_env_overrides(self) -> Result<Self, DownloadError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, DownloadError> {
        if let Some(v) = lookup(ENV_RESULT_CACHE_CAPACITY) {
            self.result_cache_capacity = parse_var(ENV_RESULT_CACHE_CAPACITY, &v)?;
        }
        if let Some(v) = lookup(ENV_TASK_REGISTRY_CAPACITY) {
            self.task_registry_capacity = parse_var(ENV_TASK_REGISTRY_CAPACITY, &v)?;
        }
        if let Some(v) = lookup(ENV_CONNECT_TIMEOUT_SECS) {
            self.connect_timeout_secs = parse_var(ENV_CONNECT_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_USER_AGENT) {
            let v = v.trim();
            self.user_agent = if v.is_empty() { None } else { Some(v.to_string()) };
        }
        Ok(self)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, DownloadError> {
    value
        .trim()
        .parse()
        .map_err(|_| DownloadError::Config(format!("{}={:?} is not a valid number", name, value)))
}
