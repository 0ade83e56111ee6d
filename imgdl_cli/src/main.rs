use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;

use imgdl_core::downloader::transport::HttpTransport;
use imgdl_core::{DownloaderConfig, ImageDownloader, ResourceKey};

mod batch;
mod terminal_observer;
use batch::{KeyReport, Outcome, TrackedTransport};
use terminal_observer::TerminalObserver;

#[derive(Parser)]
#[command(name = "imgdl", about = "Fetch, decode and cache remote images")]
struct Args {
    /// Image URLs to load
    #[arg(required = true)]
    urls: Vec<String>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the result cache capacity
    #[arg(long)]
    cache_capacity: Option<usize>,

    /// Override the connect timeout, in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Print one JSON object per URL instead of plain text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    url: &'a str,
    outcome: Outcome,
    width: Option<u32>,
    height: Option<u32>,
}

fn load_config(args: &Args) -> Result<DownloaderConfig, imgdl_core::DownloadError> {
    let mut config = match &args.config {
        Some(path) => DownloaderConfig::from_json_file(path)?,
        None => DownloaderConfig::default(),
    }
    .apply_env_overrides()?;

    if let Some(capacity) = args.cache_capacity {
        config.result_cache_capacity = capacity;
    }
    if let Some(secs) = args.connect_timeout {
        config.connect_timeout_secs = secs;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    log::debug!("config: {:?}", config);

    let transport = match HttpTransport::new(&config) {
        Ok(transport) => Arc::new(TrackedTransport::new(Arc::new(transport))),
        Err(e) => {
            eprintln!("Failed to build HTTP client: {}", e);
            return ExitCode::from(2);
        }
    };
    let downloader = match ImageDownloader::builder()
        .with_config(config)
        .with_transport(transport.clone())
        .build()
    {
        Ok(downloader) => Arc::new(downloader),
        Err(e) => {
            eprintln!("Failed to start downloader: {}", e);
            return ExitCode::from(2);
        }
    };

    let mut failed = false;
    let mut keys = Vec::new();
    for url in &args.urls {
        match ResourceKey::parse(url) {
            Ok(key) => {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            Err(e) => {
                eprintln!("Skipping {}: {}", url, e);
                failed = true;
            }
        }
    }

    let terminal = Arc::new(TerminalObserver::new(downloader.clone(), keys.len() as u64));
    let start = Instant::now();
    let reports = batch::load_all(&downloader, &transport, &terminal, &keys).await;
    terminal.finish();

    for KeyReport {
        key,
        outcome,
        dimensions,
    } in &reports
    {
        if *outcome == Outcome::Failed {
            failed = true;
        }
        if args.json {
            let report = Report {
                url: key.as_str(),
                outcome: *outcome,
                width: dimensions.map(|(w, _)| w),
                height: dimensions.map(|(_, h)| h),
            };
            match serde_json::to_string(&report) {
                Ok(line) => println!("{}", line),
                Err(e) => log::error!("failed to serialize report for {}: {}", key, e),
            }
        } else {
            match dimensions {
                Some((w, h)) => println!("{:?}\t{}x{}\t{}", outcome, w, h, key),
                None => println!("{:?}\t-\t{}", outcome, key),
            }
        }
    }

    log::info!("loaded {} url(s) in {:.2}s", keys.len(), start.elapsed().as_secs_f64());

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
