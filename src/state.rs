use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Why the current attempt was cancelled. The first recorded reason wins, so
/// a connectivity loss observed before a chunk gives up is what the
/// orchestrator sees, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The reachability watchdog lost the network. The job may retry.
    ConnectivityLost,
    /// A chunk exhausted its local retries. The job must not retry.
    ChunkFailed,
}

/// Per-chunk record in the shared table. `holding_path` is assigned once on
/// the chunk's first attempt and reused by every retry of the same job.
#[derive(Debug, Default)]
pub struct ChunkState {
    pub holding_path: Option<PathBuf>,
    pub percent: u8,
    pub finished: bool,
}

/// Shared mutable state of one job: the chunk table plus the abort reason of
/// the attempt in flight. Guarded by a single coarse lock; the lock is never
/// held across an await.
#[derive(Debug)]
pub struct JobState {
    pub chunks: Vec<ChunkState>,
    abort: Option<AbortReason>,
}

impl JobState {
    pub fn new(chunk_count: usize) -> Self {
        Self {
            chunks: (0..chunk_count).map(|_| ChunkState::default()).collect(),
            abort: None,
        }
    }

    pub fn record_abort(&mut self, reason: AbortReason) {
        if self.abort.is_none() {
            self.abort = Some(reason);
        }
    }

    /// Called at the start of every attempt.
    pub fn reset_abort(&mut self) {
        self.abort = None;
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort
    }

    pub fn all_finished(&self) -> bool {
        self.chunks.iter().all(|c| c.finished)
    }

    /// Unweighted mean of the per-chunk percentages. The last chunk absorbs
    /// the division remainder, so ranges are not all equal in length and
    /// this figure is an approximation rather than byte-accurate.
    pub fn overall_percent(&self) -> u8 {
        if self.chunks.is_empty() {
            return 0;
        }
        let sum: u32 = self.chunks.iter().map(|c| u32::from(c.percent)).sum();
        (sum / self.chunks.len() as u32) as u8
    }
}

pub type SharedState = Arc<Mutex<JobState>>;

/// Caller-supplied progress callback. Invoked synchronously while the shared
/// lock is held, so invocations are serialized and the callback must not
/// block for long.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;
