//! Synthetic video source for tests and demos.
//!
//! Two spellings:
//! - `stub://WIDTHxHEIGHT/DURATION[/FPS]`, e.g. `stub://1080x1920/45/30`
//! - a `*.synthetic.json` file holding a [`SyntheticVideo`] descriptor
//!
//! Frames are small, smooth gradients: no strong edges and no skin tones, so the
//! heuristic detectors stay quiet on them. With `caption` set, a striped band is
//! painted across the lower third, which the heuristic text detector reports.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{decode_size, FrameDecoder, SamplePoint};
use crate::control::EvalControl;
use crate::frame::{FrameSample, VideoMeta};

const SYNTHETIC_MAX_WIDTH: u32 = 64;
const DESCRIPTOR_SUFFIX: &str = ".synthetic.json";

/// Descriptor for a synthetic video.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyntheticVideo {
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    #[serde(default)]
    pub fps: Option<f64>,
    /// Every decode fails (simulates a corrupt file that still probes).
    #[serde(default)]
    pub fail_decode: bool,
    /// Paint a caption-like band into every frame.
    #[serde(default)]
    pub caption: bool,
}

impl SyntheticVideo {
    pub fn new(width: u32, height: u32, duration: f64) -> Self {
        Self {
            width,
            height,
            duration,
            fps: Some(30.0),
            fail_decode: false,
            caption: false,
        }
    }

    pub fn with_caption(mut self) -> Self {
        self.caption = true;
        self
    }

    pub fn meta(&self) -> VideoMeta {
        VideoMeta {
            width: self.width,
            height: self.height,
            duration_secs: self.duration,
            frame_rate: self.fps,
            frame_count: self.fps.map(|fps| (fps * self.duration).round() as u64),
        }
    }

    /// Write the descriptor to `path` (which should end in `.synthetic.json`).
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("failed to write synthetic descriptor {}", path.display()))
    }
}

pub fn is_synthetic(path: &Path) -> bool {
    let text = path.to_string_lossy();
    text.starts_with("stub://") || text.ends_with(DESCRIPTOR_SUFFIX)
}

fn parse_stub_url(text: &str) -> Result<SyntheticVideo> {
    let rest = text
        .strip_prefix("stub://")
        .ok_or_else(|| anyhow!("not a stub url: {}", text))?;
    let mut parts = rest.split('/');
    let dims = parts.next().unwrap_or_default();
    let (w, h) = dims
        .split_once('x')
        .ok_or_else(|| anyhow!("stub url needs WIDTHxHEIGHT: {}", text))?;
    let duration: f64 = parts
        .next()
        .ok_or_else(|| anyhow!("stub url needs a duration: {}", text))?
        .trim_end_matches('s')
        .parse()
        .with_context(|| format!("invalid duration in {}", text))?;
    let fps = match parts.next() {
        Some(raw) => Some(
            raw.trim_end_matches("fps")
                .parse::<f64>()
                .with_context(|| format!("invalid fps in {}", text))?,
        ),
        None => Some(30.0),
    };
    Ok(SyntheticVideo {
        width: w.parse().with_context(|| format!("invalid width in {}", text))?,
        height: h.parse().with_context(|| format!("invalid height in {}", text))?,
        duration,
        fps,
        fail_decode: false,
        caption: false,
    })
}

fn load(path: &Path) -> Result<SyntheticVideo> {
    let text = path.to_string_lossy();
    if text.starts_with("stub://") {
        return parse_stub_url(&text);
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read synthetic descriptor {}: {}", path.display(), e))?;
    serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid synthetic descriptor {}: {}", path.display(), e))
}

#[derive(Default)]
pub struct SyntheticDecoder;

impl SyntheticDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl FrameDecoder for SyntheticDecoder {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn probe(&self, path: &Path, _control: &EvalControl) -> Result<VideoMeta> {
        Ok(load(path)?.meta())
    }

    fn decode_at(
        &self,
        path: &Path,
        meta: &VideoMeta,
        point: &SamplePoint,
        _control: &EvalControl,
    ) -> Result<FrameSample> {
        let video = load(path)?;
        if video.fail_decode {
            return Err(anyhow!("synthetic decode failure at {:.2}s", point.timestamp_secs));
        }
        let (width, height) = decode_size(meta.width.max(1), meta.height.max(1), SYNTHETIC_MAX_WIDTH);
        let (w, h) = (width as usize, height as usize);
        let shift = point.index as usize * 3;
        let mut pixels = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                pixels.push((20 + y * 40 / h) as u8);
                pixels.push((40 + (x + shift) % 40) as u8);
                pixels.push((160 + x * 60 / w) as u8);
            }
        }
        if video.caption {
            paint_caption(&mut pixels, w, h);
        }
        Ok(FrameSample::new(
            point.index,
            point.frame_number,
            point.timestamp_secs,
            width,
            height,
            pixels,
        ))
    }
}

/// White band, two block rows tall, with 2px black strokes every 4px.
fn paint_caption(pixels: &mut [u8], w: usize, h: usize) {
    const BLOCK: usize = 8;
    let y0 = (h * 2 / 3) / BLOCK * BLOCK;
    let (x0, x1) = (BLOCK, (w / BLOCK).saturating_sub(1) * BLOCK);
    if x1 <= x0 + 3 * BLOCK || y0 + 2 * BLOCK > h {
        return;
    }
    for y in y0..y0 + 2 * BLOCK {
        for x in x0..x1 {
            let value = if (x - x0) % 4 < 2 { 0 } else { 255 };
            let i = (y * w + x) * 3;
            pixels[i..i + 3].fill(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CancelToken;
    use std::time::Duration;

    fn control() -> EvalControl {
        EvalControl::new(CancelToken::new(), Duration::from_secs(60))
    }

    #[test]
    fn stub_url_round_trips_into_meta() {
        let decoder = SyntheticDecoder::new();
        let path = Path::new("stub://1080x1920/45/30");
        assert!(is_synthetic(path));
        let meta = decoder.probe(path, &control()).unwrap();
        assert_eq!((meta.width, meta.height), (1080, 1920));
        assert_eq!(meta.duration_secs, 45.0);
        assert_eq!(meta.frame_count, Some(1350));
    }

    #[test]
    fn descriptor_file_decodes_small_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.synthetic.json");
        SyntheticVideo::new(1080, 1920, 45.0).write_to(&path).unwrap();

        let decoder = SyntheticDecoder::new();
        let meta = decoder.probe(&path, &control()).unwrap();
        let point = SamplePoint {
            index: 2,
            timestamp_secs: 10.0,
            frame_number: Some(300),
        };
        let frame = decoder.decode_at(&path, &meta, &point, &control()).unwrap();
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 114);
        assert!(frame.view().rgb24().is_ok());
    }

    #[test]
    fn caption_band_is_seen_by_the_text_heuristic() {
        use crate::detect::{DetectionKind, DetectorBackend, HeuristicTextBackend};

        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.synthetic.json");
        let captioned = dir.path().join("captioned.synthetic.json");
        SyntheticVideo::new(1080, 1920, 45.0).write_to(&plain).unwrap();
        SyntheticVideo::new(1080, 1920, 45.0)
            .with_caption()
            .write_to(&captioned)
            .unwrap();

        let decoder = SyntheticDecoder::new();
        let point = SamplePoint {
            index: 0,
            timestamp_secs: 1.0,
            frame_number: Some(30),
        };
        let text = HeuristicTextBackend::new();
        let meta = decoder.probe(&plain, &control()).unwrap();
        let frame = decoder.decode_at(&plain, &meta, &point, &control()).unwrap();
        assert!(text.detect(DetectionKind::Text, &frame.view()).unwrap().is_empty());

        let frame = decoder.decode_at(&captioned, &meta, &point, &control()).unwrap();
        let found = text.detect(DetectionKind::Text, &frame.view()).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].confidence >= 0.5);
        assert!(found[0].text_len.unwrap_or(0) >= 2);
    }

    #[test]
    fn malformed_stub_url_is_rejected() {
        assert!(SyntheticDecoder::new()
            .probe(Path::new("stub://widexhigh/10"), &control())
            .is_err());
    }
}
