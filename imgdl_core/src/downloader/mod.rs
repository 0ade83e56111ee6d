pub mod decoder;
pub mod fetcher;
pub mod image_downloader;
pub mod transport;
