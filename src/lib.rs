//! vidsift - short vertical video discovery and filtering.
//!
//! Finds short videos for a keyword across YouTube, TikTok and Instagram and keeps only
//! the ones that are vertical, inside a duration range, and free of visible faces and
//! on-screen text.
//!
//! # Architecture
//!
//! Candidates flow through a per-video state machine:
//!
//! ```text
//! PENDING -> DOWNLOADING -> SAMPLING -> DETECTING -> DECIDED
//!     \___________\______________\___________\_____-> FAILED | CANCELLED
//! ```
//!
//! Cheap metadata checks (duration, orientation) run before any frame is decoded, so a
//! video that is already disqualified never costs a detector call. The downloaded file is
//! an owned [`download::TempVideo`]; it is removed when evaluation ends on every path.
//!
//! # Module Structure
//!
//! - `frame`: Video metadata, owned frame samples, borrowed detector views
//! - `sampler`: Timestamp planning and lazy frame decoding (ffmpeg CLI, ffmpeg-next, synthetic)
//! - `detect`: Face/text capability providers, registry, compute device selection
//! - `aggregate`: Per-frame detections -> per-video reasons and evidence
//! - `orientation`: Vertical/horizontal/square classification
//! - `pipeline`: Single-video state machine with guaranteed cleanup
//! - `batch`: Bounded worker pool over the candidate set
//! - `scrape`, `download`, `probe`, `tools`: external tool collaborators
//! - `report`: results.json / accepted_list.txt / run.json
//! - `config`: Run configuration (defaults, file, env)

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod control;
pub mod detect;
pub mod download;
pub mod error;
pub mod frame;
pub mod orientation;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod sampler;
pub mod scrape;
pub mod tools;

pub use aggregate::{AggregatorConfig, FrameEvidence, FrameVerdictAggregator, RejectionPolicy, Thresholds};
pub use batch::{BatchCoordinator, BatchParams, BatchResult};
pub use control::{CancelToken, EvalControl};
pub use detect::{
    BackendRegistry, ComputeDevice, DetectionKind, DetectionResult, DetectorBackend,
    DetectorHandle, Detectors, Region,
};
pub use download::{cleanup_path, Downloader, LocalFileDownloader, TempVideo, YtDlpDownloader};
pub use error::{DetectionError, EvalError, FilterReason, ReasonCode};
pub use frame::{FrameSample, FrameView, VideoFile, VideoMeta};
pub use orientation::Orientation;
pub use pipeline::{EvalState, PendingVideo, PipelineEvent, PipelineSettings, VideoPipeline, VideoVerdict};
pub use sampler::{FrameDecoder, FrameSampler, SamplePoint};
pub use scrape::{collect_candidates, Scraper, SearchQuery, YtDlpScraper};

// -------------------- Platforms --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Tiktok,
    Instagram,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Youtube, Platform::Tiktok, Platform::Instagram];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
            Platform::Instagram => "instagram",
        }
    }

    /// Human-facing name used in the accepted list.
    pub fn display_name(self) -> &'static str {
        match self {
            Platform::Youtube => "YouTube",
            Platform::Tiktok => "TikTok",
            Platform::Instagram => "Instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" | "yt" => Ok(Platform::Youtube),
            "tiktok" | "tt" => Ok(Platform::Tiktok),
            "instagram" | "ig" => Ok(Platform::Instagram),
            other => Err(anyhow!("unknown platform '{}'", other)),
        }
    }
}

/// Parse a comma-separated platform list. Duplicates are collapsed, order is kept.
pub fn parse_platforms(value: &str) -> Result<Vec<Platform>> {
    let mut platforms = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let platform: Platform = entry.parse()?;
        if !platforms.contains(&platform) {
            platforms.push(platform);
        }
    }
    Ok(platforms)
}

// -------------------- Candidates --------------------

/// A video discovered by scraping. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateVideo {
    pub platform: Platform,
    pub url: String,
    pub title: String,
    /// Duration reported by the platform listing, when it reports one.
    pub duration_secs: Option<f64>,
    pub discovered_at: DateTime<Utc>,
}

impl CandidateVideo {
    pub fn new(platform: Platform, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            platform,
            url: url.into(),
            title: title.into(),
            duration_secs: None,
            discovered_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }
}

// -------------------- Duration Range --------------------

/// Inclusive duration range in seconds. `min >= 0` and `max > min`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DurationRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DurationRange {
    pub fn new(min_secs: f64, max_secs: f64) -> Result<Self> {
        if !min_secs.is_finite() || !max_secs.is_finite() {
            return Err(anyhow!("duration range bounds must be finite"));
        }
        if min_secs < 0.0 {
            return Err(anyhow!("duration range minimum must be >= 0 (got {})", min_secs));
        }
        if max_secs <= min_secs {
            return Err(anyhow!(
                "duration range maximum must be greater than minimum (got {}-{})",
                min_secs,
                max_secs
            ));
        }
        Ok(Self { min_secs, max_secs })
    }

    pub fn contains(&self, duration_secs: f64) -> bool {
        duration_secs >= self.min_secs && duration_secs <= self.max_secs
    }
}

impl fmt::Display for DurationRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min_secs, self.max_secs)
    }
}

impl FromStr for DurationRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        static RANGE: OnceLock<Regex> = OnceLock::new();
        let re = RANGE.get_or_init(|| {
            Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*s?\s*-\s*(\d+(?:\.\d+)?)\s*s?\s*$")
                .expect("static duration regex")
        });
        let caps = re
            .captures(s)
            .ok_or_else(|| anyhow!("duration range must look like MIN-MAX (got '{}')", s))?;
        let min: f64 = caps[1].parse()?;
        let max: f64 = caps[2].parse()?;
        Self::new(min, max)
    }
}

// -------------------- Filters --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Vertical,
    Faces,
    Text,
}

/// Active filter set. Empty means only duration and platform membership gate acceptance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    pub vertical: bool,
    pub faces: bool,
    pub text: bool,
}

impl FilterSet {
    pub fn all() -> Self {
        Self {
            vertical: true,
            faces: true,
            text: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, kind: FilterKind) -> bool {
        match kind {
            FilterKind::Vertical => self.vertical,
            FilterKind::Faces => self.faces,
            FilterKind::Text => self.text,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.vertical && !self.faces && !self.text
    }

    /// True when any frame-level detector filter is active.
    pub fn needs_frames(&self) -> bool {
        self.faces || self.text
    }

    pub fn kinds(&self) -> Vec<FilterKind> {
        [FilterKind::Vertical, FilterKind::Faces, FilterKind::Text]
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .collect()
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self
            .kinds()
            .into_iter()
            .map(|kind| match kind {
                FilterKind::Vertical => "vertical",
                FilterKind::Faces => "faces",
                FilterKind::Text => "text",
            })
            .collect();
        f.write_str(&names.join(","))
    }
}

impl FromStr for FilterSet {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("none") {
            return Ok(Self::none());
        }
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        let mut set = Self::none();
        for entry in trimmed.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.to_ascii_lowercase().as_str() {
                "vertical" => set.vertical = true,
                "faces" | "face" => set.faces = true,
                "text" => set.text = true,
                other => return Err(anyhow!("unknown filter '{}'", other)),
            }
        }
        if set.is_empty() {
            return Err(anyhow!("filter set is empty; use 'none' to disable all filters"));
        }
        Ok(set)
    }
}
