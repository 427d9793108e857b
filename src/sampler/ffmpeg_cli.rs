//! ffmpeg subprocess decoder.
//!
//! One `ffmpeg` invocation per sample: seek, decode a single frame, scale, and stream
//! raw RGB24 to stdout. Nothing touches the disk.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use super::{decode_size, FrameDecoder, SamplePoint, MAX_DECODE_WIDTH};
use crate::control::EvalControl;
use crate::frame::{FrameSample, VideoMeta};
use crate::probe::probe_video;
use crate::tools::{run_bounded, Tool};

const DECODE_LIMIT: Duration = Duration::from_secs(60);

pub struct FfmpegCliDecoder {
    max_width: u32,
}

impl FfmpegCliDecoder {
    pub fn new() -> Self {
        Self {
            max_width: MAX_DECODE_WIDTH,
        }
    }

    pub fn with_max_width(mut self, max_width: u32) -> Self {
        self.max_width = max_width.max(2);
        self
    }
}

impl Default for FfmpegCliDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for FfmpegCliDecoder {
    fn name(&self) -> &'static str {
        "ffmpeg-cli"
    }

    fn probe(&self, path: &Path, control: &EvalControl) -> Result<VideoMeta> {
        probe_video(path, Some(control))
    }

    fn decode_at(
        &self,
        path: &Path,
        meta: &VideoMeta,
        point: &SamplePoint,
        control: &EvalControl,
    ) -> Result<FrameSample> {
        let (width, height) = decode_size(meta.width, meta.height, self.max_width);
        let mut cmd = Command::new(Tool::Ffmpeg.program());
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-ss", &format!("{:.3}", point.timestamp_secs)])
            .arg("-i")
            .arg(path)
            .args([
                "-frames:v",
                "1",
                "-vf",
                &format!("scale={}:{}", width, height),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-",
            ]);
        let output = run_bounded(&mut cmd, DECODE_LIMIT, Some(control))
            .with_context(|| format!("ffmpeg could not decode {}", path.display()))?;

        let expected = width as usize * height as usize * 3;
        if output.stdout.len() != expected {
            return Err(anyhow!(
                "ffmpeg produced {} bytes at {:.2}s, expected {}",
                output.stdout.len(),
                point.timestamp_secs,
                expected
            ));
        }
        Ok(FrameSample::new(
            point.index,
            point.frame_number,
            point.timestamp_secs,
            width,
            height,
            output.stdout,
        ))
    }
}
