//! Video metadata and transient frame ownership.
//!
//! - `VideoFile`: a downloaded file plus its probed metadata. Owns the temp file.
//! - `FrameSample`: one decoded frame. Pixels are private and zeroized on drop.
//! - `FrameView`: borrowed view handed to detectors for the duration of one call.
//!
//! A `FrameSample` is produced lazily by the sampler and dropped as soon as the detector
//! calls for that frame return, so peak memory is one frame per in-flight video.

use serde::{Deserialize, Serialize};
use std::path::Path;
use zeroize::Zeroize;

use crate::download::TempVideo;
use crate::error::DetectionError;

// ----------------------------------------------------------------------------
// Video metadata
// ----------------------------------------------------------------------------

/// Probed container metadata. Dimensions are display dimensions (rotation applied).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    /// Average frame rate, when the container reports one.
    pub frame_rate: Option<f64>,
    /// Approximate frame count, when known.
    pub frame_count: Option<u64>,
}

impl VideoMeta {
    /// Effective frame rate, falling back to `frame_count / duration`.
    pub fn effective_frame_rate(&self) -> Option<f64> {
        match self.frame_rate {
            Some(fps) if fps.is_finite() && fps > 0.0 => Some(fps),
            _ => match self.frame_count {
                Some(count) if count > 0 && self.duration_secs > 0.0 => {
                    Some(count as f64 / self.duration_secs)
                }
                _ => None,
            },
        }
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// A downloaded video with its metadata.
///
/// Owns the underlying [`TempVideo`]; dropping a `VideoFile` removes the file.
pub struct VideoFile {
    temp: TempVideo,
    pub meta: VideoMeta,
}

impl VideoFile {
    pub fn new(temp: TempVideo, meta: VideoMeta) -> Self {
        Self { temp, meta }
    }

    pub fn path(&self) -> Option<&Path> {
        self.temp.path()
    }

    /// Give the temp handle back (used by the pipeline to release it explicitly).
    pub fn into_temp(self) -> TempVideo {
        self.temp
    }
}

// ----------------------------------------------------------------------------
// FrameSample: owned, transient
// ----------------------------------------------------------------------------

/// One decoded RGB24 frame.
///
/// Not `Clone`: a sample is consumed by exactly one round of detector calls.
pub struct FrameSample {
    /// Position in the sampled sequence (0-based).
    pub index: u32,
    /// Source frame number, when the frame rate is known.
    pub frame_number: Option<u64>,
    pub timestamp_secs: f64,
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl FrameSample {
    pub fn new(
        index: u32,
        frame_number: Option<u64>,
        timestamp_secs: f64,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Self {
        Self {
            index,
            frame_number,
            timestamp_secs,
            width,
            height,
            data,
        }
    }

    /// Detectors receive this view, never the sample itself.
    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl Drop for FrameSample {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

// ----------------------------------------------------------------------------
// FrameView: what detectors see
// ----------------------------------------------------------------------------

/// Borrowed view of a frame. The pixel slice cannot outlive the sample.
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    frame: &'a FrameSample,
}

impl<'a> FrameView<'a> {
    pub fn index(&self) -> u32 {
        self.frame.index
    }

    pub fn timestamp_secs(&self) -> f64 {
        self.frame.timestamp_secs
    }

    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }

    /// Validate that the buffer is a packed RGB24 image of the stated size.
    pub fn rgb24(&self) -> Result<&'a [u8], DetectionError> {
        let width = self.frame.width as usize;
        let height = self.frame.height as usize;
        if width == 0 || height == 0 {
            return Err(DetectionError::MalformedFrame(format!(
                "frame {} has zero dimension {}x{}",
                self.frame.index, width, height
            )));
        }
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| DetectionError::MalformedFrame("frame dimensions overflow".into()))?;
        if self.frame.data.len() != expected {
            return Err(DetectionError::MalformedFrame(format!(
                "frame {} expected {} RGB bytes, received {}",
                self.frame.index,
                expected,
                self.frame.data.len()
            )));
        }
        Ok(&self.frame.data)
    }
}

/// ITU-R BT.601 luma for one RGB pixel.
pub(crate) fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
