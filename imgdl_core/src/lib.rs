pub mod cache;
pub mod config;
pub mod downloader;
pub mod progress;
pub mod types;

pub use config::DownloaderConfig;
pub use downloader::image_downloader::{ImageDownloader, ImageDownloaderBuilder};
pub use progress::notifier::Subscription;
pub use progress::observer::DownloadObserver;
pub use types::types::{DownloadError, Progress, ResourceKey};
