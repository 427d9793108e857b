//! Frame sampling.
//!
//! This module provides:
//! - `plan_sample_timestamps`: pure timestamp planning (2% margins, even spacing, clamping)
//! - `FrameDecoder`: decodes one RGB24 frame at a timestamp
//! - `SampledFrames`: lazy, finite, non-restartable frame sequence
//!
//! Decoders:
//! - ffmpeg CLI subprocess (default)
//! - in-process ffmpeg (feature: decode-ffmpeg)
//! - synthetic descriptors (`stub://` paths and `*.synthetic.json` files) for tests
//!
//! Decoders MUST NOT write frames to disk. Each decoded frame is handed over as an owned
//! `FrameSample` and dropped by the pipeline once its detector calls return.
//!
//! Probing and decoding receive the video's `EvalControl`; subprocess decoders are killed
//! as soon as the batch is cancelled or the per-video deadline passes.

#[cfg(feature = "decode-ffmpeg")]
mod ffmpeg;
mod ffmpeg_cli;
mod synthetic;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::control::EvalControl;
use crate::error::EvalError;
use crate::frame::{FrameSample, VideoMeta};

#[cfg(feature = "decode-ffmpeg")]
pub use ffmpeg::FfmpegDecoder;
pub use ffmpeg_cli::FfmpegCliDecoder;
pub use synthetic::{is_synthetic, SyntheticDecoder, SyntheticVideo};

pub const DEFAULT_SAMPLE_COUNT: usize = 10;
/// Fraction of the timeline skipped at each end.
pub const EDGE_MARGIN: f64 = 0.02;
/// Decoded frames are scaled down to at most this width.
pub const MAX_DECODE_WIDTH: u32 = 640;

// -------------------- Planning --------------------

/// Where to decode one sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplePoint {
    /// Position in the sampled sequence (0-based).
    pub index: u32,
    pub timestamp_secs: f64,
    /// Source frame number, when the frame rate is known.
    pub frame_number: Option<u64>,
}

/// Plan up to `n` strictly increasing timestamps strictly inside `[0.02·D, 0.98·D]`.
///
/// With a frame rate, samples land on distinct frames and `n` is clamped to the number
/// of frames inside the window. Without one, timestamps are spaced evenly.
pub fn plan_sample_timestamps(
    duration_secs: f64,
    frame_rate: Option<f64>,
    n: usize,
) -> Result<Vec<SamplePoint>, EvalError> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(EvalError::UnreadableVideo(format!(
            "video has zero or invalid duration ({})",
            duration_secs
        )));
    }
    if n == 0 {
        return Ok(Vec::new());
    }
    let start = EDGE_MARGIN * duration_secs;
    let end = (1.0 - EDGE_MARGIN) * duration_secs;

    let mut points = match frame_rate.filter(|fps| fps.is_finite() && *fps > 0.0) {
        Some(fps) => {
            let mut first = (start * fps).floor().max(0.0) as u64 + 1;
            while first as f64 / fps <= start {
                first += 1;
            }
            let mut last = (end * fps).ceil() as u64;
            while last > 0 && last as f64 / fps >= end {
                last -= 1;
            }
            if last < first {
                return Err(EvalError::UnreadableVideo(format!(
                    "no frames inside the sampling window of a {:.2}s video",
                    duration_secs
                )));
            }
            let available = last - first + 1;
            let count = (n as u64).min(available);
            (0..count)
                .map(|i| {
                    let frame = first + ((2 * i + 1) * available) / (2 * count);
                    SamplePoint {
                        index: i as u32,
                        timestamp_secs: frame as f64 / fps,
                        frame_number: Some(frame),
                    }
                })
                .collect::<Vec<_>>()
        }
        None => {
            let step = (end - start) / n as f64;
            (0..n)
                .map(|i| SamplePoint {
                    index: i as u32,
                    timestamp_secs: start + (i as f64 + 0.5) * step,
                    frame_number: None,
                })
                .collect::<Vec<_>>()
        }
    };
    points.dedup_by(|later, earlier| later.timestamp_secs <= earlier.timestamp_secs);
    for (index, point) in points.iter_mut().enumerate() {
        point.index = index as u32;
    }
    Ok(points)
}

// -------------------- Decoding --------------------

/// Decodes single frames from local files.
pub trait FrameDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read container metadata.
    fn probe(&self, path: &Path, control: &EvalControl) -> Result<VideoMeta>;

    /// Decode the frame at `point` as packed RGB24.
    fn decode_at(
        &self,
        path: &Path,
        meta: &VideoMeta,
        point: &SamplePoint,
        control: &EvalControl,
    ) -> Result<FrameSample>;
}

/// Routes synthetic paths to the synthetic decoder and everything else to ffmpeg.
pub struct FileDecoder {
    synthetic: SyntheticDecoder,
    #[cfg(feature = "decode-ffmpeg")]
    media: FfmpegDecoder,
    #[cfg(not(feature = "decode-ffmpeg"))]
    media: FfmpegCliDecoder,
}

impl FileDecoder {
    pub fn new() -> Self {
        Self {
            synthetic: SyntheticDecoder::new(),
            #[cfg(feature = "decode-ffmpeg")]
            media: FfmpegDecoder::new(),
            #[cfg(not(feature = "decode-ffmpeg"))]
            media: FfmpegCliDecoder::new(),
        }
    }

    fn route(&self, path: &Path) -> &dyn FrameDecoder {
        if is_synthetic(path) {
            &self.synthetic
        } else {
            &self.media
        }
    }
}

impl Default for FileDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for FileDecoder {
    fn name(&self) -> &'static str {
        self.media.name()
    }

    fn probe(&self, path: &Path, control: &EvalControl) -> Result<VideoMeta> {
        self.route(path).probe(path, control)
    }

    fn decode_at(
        &self,
        path: &Path,
        meta: &VideoMeta,
        point: &SamplePoint,
        control: &EvalControl,
    ) -> Result<FrameSample> {
        self.route(path).decode_at(path, meta, point, control)
    }
}

/// Target decode size: at most `MAX_DECODE_WIDTH` wide, aspect kept, even dimensions.
pub(crate) fn decode_size(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    let (w, h) = if width > max_width {
        let scaled = (height as f64 * max_width as f64 / width as f64).round() as u32;
        (max_width, scaled)
    } else {
        (width, height)
    };
    ((w & !1).max(2), (h & !1).max(2))
}

// -------------------- Sampling --------------------

#[derive(Debug, Error)]
#[error("frame {index} at {timestamp_secs:.2}s could not be decoded: {message}")]
pub struct FrameDecodeError {
    pub index: u32,
    pub timestamp_secs: f64,
    pub message: String,
}

/// Plans sample points and hands out lazy frame sequences.
#[derive(Clone)]
pub struct FrameSampler {
    decoder: Arc<dyn FrameDecoder>,
    sample_count: usize,
}

impl FrameSampler {
    pub fn new(decoder: Arc<dyn FrameDecoder>, sample_count: usize) -> Self {
        Self {
            decoder,
            sample_count,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn decoder_name(&self) -> &'static str {
        self.decoder.name()
    }

    /// Probe metadata. A failure means the file is unreadable, unless the evaluation was
    /// cancelled or ran out of time meanwhile.
    pub fn probe(&self, path: &Path, control: &EvalControl) -> Result<VideoMeta, EvalError> {
        self.decoder.probe(path, control).map_err(|e| match control.checkpoint() {
            Err(stop) => stop,
            Ok(()) => EvalError::UnreadableVideo(format!("{:#}", e)),
        })
    }

    /// Start a lazy pass over the planned sample points.
    pub fn sample<'a>(
        &'a self,
        path: &'a Path,
        meta: &'a VideoMeta,
        control: &'a EvalControl,
    ) -> Result<SampledFrames<'a>, EvalError> {
        let points = plan_sample_timestamps(
            meta.duration_secs,
            meta.effective_frame_rate(),
            self.sample_count,
        )?;
        Ok(SampledFrames {
            decoder: self.decoder.as_ref(),
            path,
            meta,
            control,
            planned: points.len(),
            points: points.into_iter(),
        })
    }
}

/// Lazy frame sequence. Each item is decoded on demand; consumed items are gone.
pub struct SampledFrames<'a> {
    decoder: &'a dyn FrameDecoder,
    path: &'a Path,
    meta: &'a VideoMeta,
    control: &'a EvalControl,
    planned: usize,
    points: std::vec::IntoIter<SamplePoint>,
}

impl SampledFrames<'_> {
    pub fn planned(&self) -> usize {
        self.planned
    }
}

impl Iterator for SampledFrames<'_> {
    type Item = Result<FrameSample, FrameDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let point = self.points.next()?;
        Some(
            self.decoder
                .decode_at(self.path, self.meta, &point, self.control)
                .map_err(|e| FrameDecodeError {
                    index: point.index,
                    timestamp_secs: point.timestamp_secs,
                    message: format!("{:#}", e),
                }),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.points.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bounds(points: &[SamplePoint], duration: f64, n: usize) {
        assert!(points.len() <= n);
        for pair in points.windows(2) {
            assert!(pair[1].timestamp_secs > pair[0].timestamp_secs);
        }
        for p in points {
            assert!(p.timestamp_secs > 0.02 * duration, "{} too early", p.timestamp_secs);
            assert!(p.timestamp_secs < 0.98 * duration, "{} too late", p.timestamp_secs);
        }
    }

    #[test]
    fn evenly_spaced_with_frame_rate() {
        let points = plan_sample_timestamps(45.0, Some(30.0), 10).unwrap();
        assert_eq!(points.len(), 10);
        assert_bounds(&points, 45.0, 10);
        assert_eq!(points[0].index, 0);
        assert!(points.iter().all(|p| p.frame_number.is_some()));
    }

    #[test]
    fn evenly_spaced_without_frame_rate() {
        let points = plan_sample_timestamps(20.0, None, 8).unwrap();
        assert_eq!(points.len(), 8);
        assert_bounds(&points, 20.0, 8);
    }

    #[test]
    fn clamps_to_available_frames() {
        // 1s at 10fps: window (0.02, 0.98) holds frames 1..=9
        let points = plan_sample_timestamps(1.0, Some(10.0), 50).unwrap();
        assert_eq!(points.len(), 9);
        assert_bounds(&points, 1.0, 50);
        let frames: Vec<u64> = points.iter().filter_map(|p| p.frame_number).collect();
        assert_eq!(frames, (1..=9).collect::<Vec<u64>>());
    }

    #[test]
    fn bounds_hold_across_shapes() {
        for &(duration, fps) in &[(50.0, 30.0), (7.3, 23.976), (600.0, 60.0), (3.0, 1.0)] {
            for n in [1usize, 2, 10, 37] {
                if let Ok(points) = plan_sample_timestamps(duration, Some(fps), n) {
                    assert_bounds(&points, duration, n);
                }
            }
        }
    }

    #[test]
    fn zero_duration_is_unreadable() {
        assert!(matches!(
            plan_sample_timestamps(0.0, Some(30.0), 10),
            Err(EvalError::UnreadableVideo(_))
        ));
        assert!(matches!(
            plan_sample_timestamps(f64::NAN, None, 10),
            Err(EvalError::UnreadableVideo(_))
        ));
    }

    #[test]
    fn decode_size_caps_width_and_keeps_even() {
        assert_eq!(decode_size(1080, 1920, 640), (640, 1138));
        assert_eq!(decode_size(481, 855, 640), (480, 854));
        assert_eq!(decode_size(1, 1, 640), (2, 2));
    }
}
