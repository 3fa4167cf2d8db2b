use anyhow::{bail, Context, Result};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::planner::ByteRange;
use crate::state::{AbortReason, ProgressFn, SharedState};
use crate::utils::allocate_holding_path;

/// Write-side buffering between the response stream and the holding file.
pub const BUFFER_SIZE: usize = 10 * 1024 * 1024;

const CHUNK_ATTEMPTS: u32 = 3;

/// Downloads one byte range of the resource into its holding file.
///
/// Each worker runs up to three local attempts. A retry restarts the chunk
/// from byte 0: the holding path is reused but its contents are truncated,
/// there is no partial-byte resume. Exhausting the attempts marks the whole
/// job as non-retryable and cancels every sibling worker.
pub struct ChunkWorker {
    pub client: Client,
    pub url: String,
    pub index: usize,
    pub range: ByteRange,
    pub state: SharedState,
    pub progress: ProgressFn,
    pub cancel: CancellationToken,
    pub retry_delay: Duration,
}

enum Outcome {
    Finished,
    Cancelled,
}

impl ChunkWorker {
    pub async fn run(self) {
        for attempt in 1..=CHUNK_ATTEMPTS {
            if self.cancel.is_cancelled() {
                return;
            }

            let holding_path = match self.prepare_holding_path() {
                Some(path) => path,
                // Finished by a previous whole-job attempt, nothing to do.
                None => return,
            };

            match self.fetch_range(&holding_path).await {
                Ok(Outcome::Finished) => return,
                Ok(Outcome::Cancelled) => return,
                Err(e) => {
                    warn!(index = self.index, attempt, error = %e, "chunk attempt failed");
                    self.reset_progress();
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        // This range cannot be fetched, take the whole job down with it.
        self.state
            .lock()
            .unwrap()
            .record_abort(AbortReason::ChunkFailed);
        self.cancel.cancel();
    }

    /// Reuses the holding path assigned by an earlier attempt or assigns a
    /// fresh one exactly once. `None` means the chunk is already finished.
    fn prepare_holding_path(&self) -> Option<PathBuf> {
        let mut job = self.state.lock().unwrap();
        let chunk = &mut job.chunks[self.index];
        if chunk.finished {
            return None;
        }
        if chunk.holding_path.is_none() {
            chunk.holding_path = Some(allocate_holding_path());
        }
        chunk.holding_path.clone()
    }

    async fn fetch_range(&self, holding_path: &Path) -> Result<Outcome> {
        let range_header = format!("bytes={}-{}", self.range.start, self.range.end);
        let response = self
            .client
            .get(&self.url)
            .header(header::RANGE, range_header)
            .send()
            .await
            .context("range request failed")?;

        if response.status() != StatusCode::PARTIAL_CONTENT {
            bail!("expected partial content, got {}", response.status());
        }

        // Truncates any partial content a previous attempt left behind.
        let file = File::create(holding_path)
            .await
            .context("failed to create holding file")?;
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;

        while let Some(item) = stream.next().await {
            let bytes = item.context("error while reading chunk body")?;
            writer
                .write_all(&bytes)
                .await
                .context("failed to write holding file")?;
            received += bytes.len() as u64;
            self.update_progress(received);

            // Cooperative cancellation: never abort an in-flight read, only
            // refrain from starting the next one.
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
        }

        writer.flush().await.context("failed to flush holding file")?;
        self.mark_finished();
        debug!(index = self.index, bytes = received, "chunk finished");
        Ok(Outcome::Finished)
    }

    fn update_progress(&self, received: u64) {
        let mut job = self.state.lock().unwrap();
        job.chunks[self.index].percent = (received * 100 / self.range.len()).min(100) as u8;
        (self.progress)(job.overall_percent());
    }

    fn mark_finished(&self) {
        let mut job = self.state.lock().unwrap();
        job.chunks[self.index].finished = true;
        job.chunks[self.index].percent = 100;
        (self.progress)(job.overall_percent());
    }

    fn reset_progress(&self) {
        self.state.lock().unwrap().chunks[self.index].percent = 0;
    }
}
