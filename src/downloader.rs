use anyhow::{bail, Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chunk::ChunkWorker;
use crate::merge;
use crate::netcheck::{self, AttemptSlot};
use crate::planner::{self, ByteRange, SINGLE_CHUNK_THRESHOLD};
use crate::probe;
use crate::state::{AbortReason, JobState, ProgressFn, SharedState};

const JOB_ATTEMPTS: u32 = 3;
const USER_AGENT: &str = concat!("pdl/", env!("CARGO_PKG_VERSION"));

/// Tunables for one `DownloadManager`. Defaults match the engine's fixed
/// constants; tests shrink the delays and point the reachability probe at a
/// local server.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Resources below this size are fetched as a single chunk.
    pub parallel_threshold: u64,
    pub probe_retry_delay: Duration,
    pub chunk_retry_delay: Duration,
    pub attempt_backoff: Duration,
    pub connectivity_interval: Duration,
    pub connectivity_url: String,
    /// Disables certificate validation on the clients built for a job.
    pub skip_tls_validation: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: SINGLE_CHUNK_THRESHOLD,
            probe_retry_delay: Duration::from_secs(5),
            chunk_retry_delay: Duration::from_secs(5),
            attempt_backoff: Duration::from_secs(30),
            connectivity_interval: Duration::from_millis(100),
            connectivity_url: "http://google.com/generate_204".to_string(),
            skip_tls_validation: false,
        }
    }
}

/// Drives a whole download job: probe the size, plan the ranges, run up to
/// three parallel chunk passes, merge, and clean up.
pub struct DownloadManager {
    config: DownloadConfig,
    client: Client,
}

impl DownloadManager {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(config.skip_tls_validation)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    /// Downloads `url` into `destination`, fetching up to `parallelism`
    /// ranges concurrently (non-positive means one per logical CPU).
    /// Returns `true` only if the destination file was fully assembled; any
    /// abort path yields `false` and leaves no destination or holding files
    /// behind.
    pub async fn download_file(
        &self,
        url: &str,
        destination: &Path,
        parallelism: i32,
        progress: ProgressFn,
    ) -> bool {
        match self.run_job(url, destination, parallelism, progress).await {
            Ok(()) => true,
            Err(e) => {
                warn!(url, error = %e, "download failed");
                false
            }
        }
    }

    async fn run_job(
        &self,
        url: &str,
        destination: &Path,
        parallelism: i32,
        progress: ProgressFn,
    ) -> Result<()> {
        let total_size = probe::probe_size(&self.client, url, self.config.probe_retry_delay)
            .await
            .context("could not determine resource size")?;
        if total_size == 0 {
            bail!("resource reports zero length");
        }

        let ranges = planner::plan_ranges(total_size, parallelism, self.config.parallel_threshold);
        info!(url, total_size, chunks = ranges.len(), "starting download");

        let state: SharedState = Arc::new(Mutex::new(JobState::new(ranges.len())));
        let current_attempt: AttemptSlot = Arc::new(Mutex::new(CancellationToken::new()));
        let monitor_shutdown = CancellationToken::new();
        let monitor = netcheck::spawn_monitor(
            self.client.clone(),
            self.config.connectivity_url.clone(),
            self.config.connectivity_interval,
            state.clone(),
            current_attempt.clone(),
            monitor_shutdown.clone(),
        );

        let result = self
            .run_attempts(url, destination, &ranges, &state, &current_attempt, progress)
            .await;

        // Holding files are removed on every exit path, success or not.
        cleanup_holding_files(&state).await;
        monitor_shutdown.cancel();
        let _ = monitor.await;

        result
    }

    async fn run_attempts(
        &self,
        url: &str,
        destination: &Path,
        ranges: &[ByteRange],
        state: &SharedState,
        current_attempt: &AttemptSlot,
        progress: ProgressFn,
    ) -> Result<()> {
        for attempt in 1..=JOB_ATTEMPTS {
            if netcheck::check_connectivity(&self.client, &self.config.connectivity_url).await {
                let cancel = CancellationToken::new();
                *current_attempt.lock().unwrap() = cancel.clone();
                state.lock().unwrap().reset_abort();

                self.run_chunk_pass(url, ranges, state, &cancel, progress.clone())
                    .await;

                if state.lock().unwrap().all_finished() {
                    merge::merge_chunks(state, destination).await?;
                    info!(attempt, "download complete");
                    return Ok(());
                }

                match state.lock().unwrap().abort_reason() {
                    Some(AbortReason::ChunkFailed) => {
                        bail!("a chunk exhausted its retries, aborting")
                    }
                    Some(AbortReason::ConnectivityLost) => {
                        warn!(attempt, "attempt cancelled by connectivity loss");
                    }
                    None => warn!(attempt, "attempt ended with unfinished chunks"),
                }
            } else {
                warn!(attempt, "connectivity is down, skipping attempt");
            }

            if attempt < JOB_ATTEMPTS {
                tokio::time::sleep(self.config.attempt_backoff).await;
            }
        }

        bail!("attempt budget exhausted")
    }

    /// One parallel pass over all chunks under a shared cancellation token.
    /// Awaiting every handle is the barrier between the parallel phase and
    /// merge or retry.
    async fn run_chunk_pass(
        &self,
        url: &str,
        ranges: &[ByteRange],
        state: &SharedState,
        cancel: &CancellationToken,
        progress: ProgressFn,
    ) {
        let mut handles = Vec::with_capacity(ranges.len());
        for (index, range) in ranges.iter().enumerate() {
            let worker = ChunkWorker {
                client: self.client.clone(),
                url: url.to_string(),
                index,
                range: *range,
                state: state.clone(),
                progress: progress.clone(),
                cancel: cancel.clone(),
                retry_delay: self.config.chunk_retry_delay,
            };
            handles.push(tokio::spawn(worker.run()));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn cleanup_holding_files(state: &SharedState) {
    let paths: Vec<PathBuf> = {
        let job = state.lock().unwrap();
        job.chunks
            .iter()
            .filter_map(|c| c.holding_path.clone())
            .collect()
    };
    for path in paths {
        let _ = tokio::fs::remove_file(path).await;
    }
}
