//! Cooperative cancellation and per-video deadlines.
//!
//! Cancellation is observed at checkpoints: before download, before sampling, and before
//! each detector call. Detector work already running at a checkpoint finishes; its result
//! is discarded by the caller. External tools (yt-dlp, ffprobe, ffmpeg) poll the control
//! and are killed instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::EvalError;

/// Batch-wide cancellation flag. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Cancellation plus deadline for one video evaluation.
#[derive(Clone, Debug)]
pub struct EvalControl {
    cancel: CancelToken,
    started: Instant,
    budget: Duration,
}

impl EvalControl {
    pub fn new(cancel: CancelToken, budget: Duration) -> Self {
        Self {
            cancel,
            started: Instant::now(),
            budget,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fails with `Cancelled` or `Timeout` when evaluation must stop. Cancellation wins.
    pub fn checkpoint(&self) -> Result<(), EvalError> {
        if self.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        if self.is_expired() {
            return Err(EvalError::Timeout(self.budget));
        }
        Ok(())
    }
}
