//! Single-video evaluation.
//!
//! ```text
//! PENDING -> DOWNLOADING -> SAMPLING -> DETECTING -> DECIDED
//!                 |             |           |
//!                 +-------------+-----------+--> FAILED | CANCELLED
//! ```
//!
//! Guarantees:
//! - A `PendingVideo` is consumed by `evaluate`, so a video is evaluated at most once.
//! - The downloaded file is released before `evaluate` returns, on every exit path
//!   (including unwinding, through `TempVideo`'s drop).
//! - Reasons found before a failure, from the cheap checks and from completed frames,
//!   are kept; the failure reason is appended.
//!
//! Cancellation and the per-video deadline are observed before download, before
//! sampling, and before each detector call. A detector call that was already running when
//! cancellation arrived finishes, and its result is dropped.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::aggregate::{AggregatorConfig, FrameEvidence, FrameVerdictAggregator};
use crate::control::{CancelToken, EvalControl};
use crate::detect::{DetectionKind, Detectors};
use crate::download::{Downloader, TempVideo};
use crate::error::{order_reasons, EvalError, FilterReason, ReasonCode};
use crate::frame::VideoMeta;
use crate::orientation::{self, Orientation, DEFAULT_ASPECT_THRESHOLD};
use crate::sampler::FrameSampler;
use crate::{CandidateVideo, DurationRange, FilterSet};

pub const DEFAULT_VIDEO_TIMEOUT: Duration = Duration::from_secs(600);

// -------------------- States & Events --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvalState {
    Pending,
    Downloading,
    Sampling,
    Detecting,
    Decided,
    Failed,
    Cancelled,
}

impl EvalState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EvalState::Decided | EvalState::Failed | EvalState::Cancelled)
    }
}

/// Structured progress emitted by the pipeline. Rendering is the sink's business.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    Transition {
        url: String,
        from: EvalState,
        to: EvalState,
    },
    DetectorFailed {
        url: String,
        kind: DetectionKind,
        frame_index: u32,
        error: String,
    },
    FrameDecodeFailed {
        url: String,
        frame_index: u32,
        error: String,
    },
    Verdict {
        url: String,
        title: String,
        accepted: bool,
        reasons: Vec<ReasonCode>,
    },
    CleanedUp {
        url: String,
        files_removed: usize,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

impl<F> EventSink for F
where
    F: Fn(&PipelineEvent) + Send + Sync,
{
    fn emit(&self, event: &PipelineEvent) {
        self(event)
    }
}

/// Default sink: routes events to the `log` facade.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Transition { url, from, to } => {
                log::debug!("{}: {:?} -> {:?}", url, from, to)
            }
            PipelineEvent::DetectorFailed {
                url,
                kind,
                frame_index,
                error,
            } => log::warn!(
                "{}: {} detector failed on sample {}: {}",
                url,
                kind,
                frame_index,
                error
            ),
            PipelineEvent::FrameDecodeFailed {
                url,
                frame_index,
                error,
            } => log::warn!("{}: skipped sample {}: {}", url, frame_index, error),
            PipelineEvent::Verdict {
                url,
                title,
                accepted,
                reasons,
            } => {
                if *accepted {
                    log::info!("accepted: {} ({})", title, url);
                } else {
                    let codes: Vec<&str> = reasons.iter().map(|code| code.as_str()).collect();
                    log::info!("rejected: {} ({}) [{}]", title, url, codes.join(", "));
                }
            }
            PipelineEvent::CleanedUp { url, files_removed } => {
                log::debug!("{}: cleaned up {} file(s)", url, files_removed)
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// -------------------- Settings & Records --------------------

/// Read-only settings shared by every pipeline run in a batch.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub filters: FilterSet,
    pub duration_range: DurationRange,
    pub aggregator: AggregatorConfig,
    pub aspect_threshold: f64,
    pub video_timeout: Duration,
    /// Keep detecting after a cheap check failed, so every reason is reported.
    pub exhaustive: bool,
    pub temp_dir: PathBuf,
}

impl PipelineSettings {
    pub fn new(filters: FilterSet, duration_range: DurationRange, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            filters,
            duration_range,
            aggregator: AggregatorConfig::default(),
            aspect_threshold: DEFAULT_ASPECT_THRESHOLD,
            video_timeout: DEFAULT_VIDEO_TIMEOUT,
            exhaustive: false,
            temp_dir: temp_dir.into(),
        }
    }
}

/// A candidate waiting for evaluation. Not `Clone`: evaluating consumes it.
#[derive(Debug)]
pub struct PendingVideo {
    candidate: CandidateVideo,
}

impl PendingVideo {
    pub fn new(candidate: CandidateVideo) -> Self {
        Self { candidate }
    }

    pub fn candidate(&self) -> &CandidateVideo {
        &self.candidate
    }
}

/// Final decision for one video.
#[derive(Clone, Debug, Serialize)]
pub struct VideoVerdict {
    pub candidate: CandidateVideo,
    /// True iff `reasons` is empty.
    pub accepted: bool,
    pub reasons: Vec<FilterReason>,
    pub evidence: FrameEvidence,
    pub final_state: EvalState,
    pub meta: Option<VideoMeta>,
    pub processed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl VideoVerdict {
    fn build(
        candidate: CandidateVideo,
        mut reasons: Vec<FilterReason>,
        evidence: FrameEvidence,
        final_state: EvalState,
        meta: Option<VideoMeta>,
        elapsed: Duration,
    ) -> Self {
        order_reasons(&mut reasons);
        Self {
            candidate,
            accepted: reasons.is_empty(),
            reasons,
            evidence,
            final_state,
            meta,
            processed_at: Utc::now(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Verdict for a video whose evaluation never produced one (e.g. a worker panic).
    pub fn from_error(candidate: CandidateVideo, error: &EvalError) -> Self {
        let state = match error {
            EvalError::Cancelled => EvalState::Cancelled,
            _ => EvalState::Failed,
        };
        Self::build(
            candidate,
            vec![error.reason()],
            FrameEvidence::default(),
            state,
            None,
            Duration::ZERO,
        )
    }

    pub fn has_reason(&self, code: ReasonCode) -> bool {
        self.reasons.iter().any(|r| r.code == code)
    }

    pub fn reason_codes(&self) -> Vec<ReasonCode> {
        self.reasons.iter().map(|r| r.code).collect()
    }
}

// -------------------- Pipeline --------------------

/// Partial results that survive a failure.
#[derive(Default)]
struct Progress {
    cheap: Vec<FilterReason>,
    aggregator: Option<FrameVerdictAggregator>,
    evidence: FrameEvidence,
    meta: Option<VideoMeta>,
}

struct StateTracker<'a> {
    url: &'a str,
    state: EvalState,
    events: &'a dyn EventSink,
}

impl StateTracker<'_> {
    fn to(&mut self, next: EvalState) {
        if self.state == next {
            return;
        }
        self.events.emit(&PipelineEvent::Transition {
            url: self.url.to_string(),
            from: self.state,
            to: next,
        });
        self.state = next;
    }
}

pub struct VideoPipeline {
    settings: PipelineSettings,
    downloader: Arc<dyn Downloader>,
    sampler: FrameSampler,
    detectors: Detectors,
    events: Arc<dyn EventSink>,
}

impl VideoPipeline {
    /// Every active frame filter must have a bound detector.
    pub fn new(
        settings: PipelineSettings,
        downloader: Arc<dyn Downloader>,
        sampler: FrameSampler,
        detectors: Detectors,
    ) -> Result<Self> {
        if settings.filters.faces && detectors.face.is_none() {
            return Err(anyhow!("face filter is active but no face detector is bound"));
        }
        if settings.filters.text && detectors.text.is_none() {
            return Err(anyhow!("text filter is active but no text detector is bound"));
        }
        if settings.filters.needs_frames() && sampler.sample_count() == 0 {
            return Err(anyhow!("sample count must be at least 1"));
        }
        Ok(Self {
            settings,
            downloader,
            sampler,
            detectors,
            events: Arc::new(LogSink),
        })
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn detectors(&self) -> &Detectors {
        &self.detectors
    }

    /// Evaluate one video to a verdict. Never fails: errors become reasons.
    pub fn evaluate(&self, pending: PendingVideo, cancel: &CancelToken) -> VideoVerdict {
        let started = Instant::now();
        let candidate = pending.candidate;
        let control = EvalControl::new(cancel.clone(), self.settings.video_timeout);
        let mut tracker = StateTracker {
            url: &candidate.url,
            state: EvalState::Pending,
            events: self.events.as_ref(),
        };
        let mut temp: Option<TempVideo> = None;
        let mut progress = Progress::default();

        let outcome = self.run_stages(&candidate, &control, &mut tracker, &mut temp, &mut progress);

        let (reasons, final_state) = match outcome {
            Ok(reasons) => (reasons, EvalState::Decided),
            Err(error) => {
                let state = match error {
                    EvalError::Cancelled => EvalState::Cancelled,
                    _ => EvalState::Failed,
                };
                // Frames that completed before the failure still count.
                let cheap = std::mem::take(&mut progress.cheap);
                let mut reasons = match progress.aggregator.as_ref() {
                    Some(aggregator) => {
                        let (reasons, evidence) = aggregator.finish(cheap);
                        progress.evidence = evidence;
                        reasons
                    }
                    None => cheap,
                };
                reasons.push(error.reason());
                (reasons, state)
            }
        };
        tracker.to(final_state);

        if let Some(mut temp) = temp.take() {
            let files_removed = temp.release();
            self.events.emit(&PipelineEvent::CleanedUp {
                url: candidate.url.clone(),
                files_removed,
            });
        }

        let verdict = VideoVerdict::build(
            candidate,
            reasons,
            progress.evidence,
            final_state,
            progress.meta,
            started.elapsed(),
        );
        self.events.emit(&PipelineEvent::Verdict {
            url: verdict.candidate.url.clone(),
            title: verdict.candidate.title.clone(),
            accepted: verdict.accepted,
            reasons: verdict.reason_codes(),
        });
        verdict
    }

    fn run_stages(
        &self,
        candidate: &CandidateVideo,
        control: &EvalControl,
        tracker: &mut StateTracker<'_>,
        temp: &mut Option<TempVideo>,
        progress: &mut Progress,
    ) -> Result<Vec<FilterReason>, EvalError> {
        let settings = &self.settings;

        // download
        control.checkpoint()?;
        tracker.to(EvalState::Downloading);
        let slot = TempVideo::allocate(&settings.temp_dir, candidate)
            .map_err(|e| EvalError::Internal(format!("{:#}", e)))?;
        let slot = temp.insert(slot);
        self.downloader.download(candidate, slot, control)?;
        let path: PathBuf = slot
            .path()
            .map(Path::to_path_buf)
            .ok_or_else(|| EvalError::Download("downloader reported success without a file".into()))?;

        // cheap checks
        tracker.to(EvalState::Sampling);
        let mut meta = self.sampler.probe(&path, control)?;
        if !(meta.duration_secs > 0.0) {
            // Some containers carry no duration; fall back to what the platform listed.
            meta.duration_secs = candidate.duration_secs.unwrap_or(0.0);
        }
        progress.meta = Some(meta.clone());

        let duration = meta.duration_secs;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(EvalError::UnreadableVideo("video has zero duration".into()));
        }
        if !settings.duration_range.contains(duration) {
            progress.cheap.push(FilterReason::new(
                ReasonCode::DurationOutOfRange,
                format!("{:.1}s outside {}s", duration, settings.duration_range),
            ));
            if settings.filters.vertical {
                self.check_orientation(&meta, progress)?;
            }
            return Ok(std::mem::take(&mut progress.cheap));
        }
        if settings.filters.vertical {
            self.check_orientation(&meta, progress)?;
        }
        if !progress.cheap.is_empty() && !settings.exhaustive {
            return Ok(std::mem::take(&mut progress.cheap));
        }
        if !settings.filters.needs_frames() {
            return Ok(std::mem::take(&mut progress.cheap));
        }

        // frames
        control.checkpoint()?;
        let aggregator = progress
            .aggregator
            .insert(FrameVerdictAggregator::new(settings.aggregator, &settings.filters));
        let mut frames = self.sampler.sample(&path, &meta, control)?;
        let mut decoded_any = false;
        while !aggregator.is_saturated() {
            let Some(item) = frames.next() else {
                break;
            };
            let frame = match item {
                Ok(frame) => frame,
                Err(e) => {
                    // a decoder killed by cancellation or the deadline is not a bad file
                    control.checkpoint()?;
                    if !decoded_any {
                        return Err(EvalError::UnreadableVideo(e.to_string()));
                    }
                    self.events.emit(&PipelineEvent::FrameDecodeFailed {
                        url: candidate.url.clone(),
                        frame_index: e.index,
                        error: e.message,
                    });
                    continue;
                }
            };
            if !decoded_any {
                decoded_any = true;
                tracker.to(EvalState::Detecting);
            }

            aggregator.begin_frame();
            for kind in DetectionKind::ALL {
                if !aggregator.wants(kind) {
                    continue;
                }
                let handle = self
                    .detectors
                    .get(kind)
                    .ok_or_else(|| EvalError::Internal(format!("no {} detector bound", kind)))?;
                control.checkpoint()?;
                let result = handle.detect(&frame.view());
                if control.is_cancelled() {
                    return Err(EvalError::Cancelled);
                }
                match result {
                    Ok(detections) => {
                        aggregator.observe(kind, frame.index, &detections);
                    }
                    Err(e) => {
                        aggregator.record_failure(kind);
                        self.events.emit(&PipelineEvent::DetectorFailed {
                            url: candidate.url.clone(),
                            kind,
                            frame_index: frame.index,
                            error: e.to_string(),
                        });
                    }
                }
            }
            progress.evidence = aggregator.evidence();
            drop(frame);
        }
        if !decoded_any {
            return Err(EvalError::UnreadableVideo("no frame could be decoded".into()));
        }

        let (reasons, evidence) = aggregator.finish(std::mem::take(&mut progress.cheap));
        progress.evidence = evidence;
        Ok(reasons)
    }

    fn check_orientation(&self, meta: &VideoMeta, progress: &mut Progress) -> Result<(), EvalError> {
        let orientation = orientation::classify(meta.width, meta.height, self.settings.aspect_threshold)?;
        if orientation != Orientation::Vertical {
            progress.cheap.push(FilterReason::new(
                ReasonCode::NotVertical,
                format!("{}x{} is {}", meta.width, meta.height, orientation),
            ));
        }
        Ok(())
    }
}
