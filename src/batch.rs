//! Batch coordination: a bounded worker pool over the candidate set.
//!
//! Workers pull candidates from a shared queue, run one [`VideoPipeline`] evaluation each,
//! and push verdicts back in completion order. A panic inside one evaluation becomes an
//! `INTERNAL_ERROR` verdict for that video only.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::control::CancelToken;
use crate::error::{EvalError, ReasonCode};
use crate::pipeline::{PendingVideo, VideoPipeline, VideoVerdict};
use crate::{CandidateVideo, DurationRange, FilterSet, Platform};

pub const DEFAULT_WORKERS: usize = 2;

/// Run parameters, echoed into `run.json`.
#[derive(Clone, Debug, Serialize)]
pub struct BatchParams {
    pub keyword: String,
    pub duration_range: DurationRange,
    pub filters: FilterSet,
    pub platforms: Vec<Platform>,
    pub max_per_platform: usize,
}

impl BatchParams {
    pub fn validate(&self) -> Result<()> {
        if self.platforms.is_empty() {
            return Err(anyhow!("platform set must not be empty"));
        }
        if self.max_per_platform == 0 {
            return Err(anyhow!("max results per platform must be at least 1"));
        }
        DurationRange::new(self.duration_range.min_secs, self.duration_range.max_secs)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchResult {
    pub params: BatchParams,
    /// Completion order.
    pub verdicts: Vec<VideoVerdict>,
    pub cancelled: bool,
}

impl BatchResult {
    pub fn accepted(&self) -> impl Iterator<Item = &VideoVerdict> {
        self.verdicts.iter().filter(|v| v.accepted)
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted().count()
    }

    pub fn rejected_count(&self) -> usize {
        self.verdicts.len() - self.accepted_count()
    }

    /// How many videos carry each reason code.
    pub fn reason_histogram(&self) -> BTreeMap<ReasonCode, usize> {
        let mut histogram = BTreeMap::new();
        for verdict in &self.verdicts {
            let mut seen = HashSet::new();
            for reason in &verdict.reasons {
                if seen.insert(reason.code) {
                    *histogram.entry(reason.code).or_insert(0) += 1;
                }
            }
        }
        histogram
    }
}

/// Called once per finished video with (verdict, done, total).
pub type ProgressFn<'a> = dyn Fn(&VideoVerdict, usize, usize) + Sync + 'a;

pub struct BatchCoordinator {
    pipeline: Arc<VideoPipeline>,
    workers: usize,
    cancel: CancelToken,
}

impl BatchCoordinator {
    pub fn new(pipeline: Arc<VideoPipeline>, workers: usize, cancel: CancelToken) -> Self {
        Self {
            pipeline,
            workers: workers.max(1),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Evaluate every candidate. Never fails for a single video; only invalid params fail.
    ///
    /// Duplicate URLs are evaluated once. Candidates from platforms outside
    /// `params.platforms` are dropped.
    pub fn run(
        &self,
        params: BatchParams,
        candidates: Vec<CandidateVideo>,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<BatchResult> {
        params.validate()?;

        let mut seen = HashSet::new();
        let queue: Vec<CandidateVideo> = candidates
            .into_iter()
            .filter(|c| params.platforms.contains(&c.platform))
            .filter(|c| seen.insert(c.url.clone()))
            .collect();
        let total = queue.len();
        log::info!(
            "evaluating {} candidate(s) with {} worker(s), filters: {}",
            total,
            self.workers.min(total.max(1)),
            params.filters
        );

        let (job_tx, job_rx) = mpsc::channel::<PendingVideo>();
        for candidate in queue {
            // The receiver is alive until the scope below ends.
            let _ = job_tx.send(PendingVideo::new(candidate));
        }
        drop(job_tx);
        let job_rx = Mutex::new(job_rx);
        let (done_tx, done_rx) = mpsc::channel::<VideoVerdict>();

        let mut verdicts = Vec::with_capacity(total);
        thread::scope(|scope| {
            for worker_id in 0..self.workers.min(total) {
                let job_rx = &job_rx;
                let done_tx = done_tx.clone();
                let pipeline = Arc::clone(&self.pipeline);
                let cancel = self.cancel.clone();
                scope.spawn(move || {
                    log::debug!("worker {} started", worker_id);
                    loop {
                        let next = match job_rx.lock() {
                            Ok(rx) => rx.recv(),
                            Err(_) => break,
                        };
                        let Ok(pending) = next else {
                            break;
                        };
                        let verdict = evaluate_guarded(&pipeline, pending, &cancel);
                        if done_tx.send(verdict).is_err() {
                            break;
                        }
                    }
                    log::debug!("worker {} finished", worker_id);
                });
            }
            drop(done_tx);

            for verdict in done_rx.iter() {
                verdicts.push(verdict);
                if let (Some(progress), Some(last)) = (progress, verdicts.last()) {
                    progress(last, verdicts.len(), total);
                }
            }
        });

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            log::warn!("batch cancelled: {} of {} video(s) finished", verdicts.len(), total);
        }
        Ok(BatchResult {
            params,
            verdicts,
            cancelled,
        })
    }
}

fn evaluate_guarded(pipeline: &VideoPipeline, pending: PendingVideo, cancel: &CancelToken) -> VideoVerdict {
    let candidate = pending.candidate().clone();
    match panic::catch_unwind(AssertUnwindSafe(|| pipeline.evaluate(pending, cancel))) {
        Ok(verdict) => verdict,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            log::error!("evaluation of {} panicked: {}", candidate.url, message);
            VideoVerdict::from_error(candidate, &EvalError::Internal(message))
        }
    }
}
