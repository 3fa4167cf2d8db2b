mod chunk;
mod downloader;
mod merge;
mod netcheck;
mod planner;
mod probe;
mod state;
mod utils;

use anyhow::{bail, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

use crate::downloader::{DownloadConfig, DownloadManager};
use crate::state::ProgressFn;

#[derive(Parser, Debug)]
#[command(author, version, about = "Parallel range-based HTTP downloader", long_about = None)]
struct Args {
    /// URL to download
    #[arg(index = 1)]
    url: String,

    /// Destination file path (defaults to the filename in the URL)
    #[arg(index = 2)]
    destination: Option<PathBuf>,

    /// Number of parallel chunks (non-positive uses the number of logical CPUs)
    #[arg(short = 'p', long, default_value_t = 0)]
    parallel: i32,

    /// Skip TLS certificate validation
    #[arg(short = 'k', long)]
    insecure: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let destination = match args.destination {
        Some(path) => path,
        None => PathBuf::from(utils::get_filename_from_url(&args.url)?),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let config = DownloadConfig {
            skip_tls_validation: args.insecure,
            ..DownloadConfig::default()
        };
        let manager = DownloadManager::new(config)?;

        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        bar.set_message(format!("Downloading {}", destination.display()));

        let bar_handle = bar.clone();
        let progress: ProgressFn = Arc::new(move |percent| {
            bar_handle.set_position(u64::from(percent));
        });

        let ok = manager
            .download_file(&args.url, &destination, args.parallel, progress)
            .await;

        if ok {
            bar.finish_with_message(format!("Completed   {}", destination.display()));
            Ok(())
        } else {
            bar.abandon_with_message(format!("Failed      {}", destination.display()));
            bail!("download failed: {}", args.url)
        }
    })
}
