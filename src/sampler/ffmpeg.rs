//! In-process decoder using ffmpeg-next.
//!
//! Each sample opens the input, seeks to the nearest keyframe before the target, and
//! decodes forward until the target presentation time. Frames are scaled to RGB24 in
//! memory.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::Path;
use std::sync::Once;

use super::{decode_size, FrameDecoder, SamplePoint, MAX_DECODE_WIDTH};
use crate::control::EvalControl;
use crate::frame::{FrameSample, VideoMeta};
use crate::probe::probe_video;

static INIT: Once = Once::new();

pub struct FfmpegDecoder {
    max_width: u32,
}

impl FfmpegDecoder {
    pub fn new() -> Self {
        INIT.call_once(|| {
            if let Err(e) = ffmpeg::init() {
                log::error!("ffmpeg initialisation failed: {}", e);
            }
        });
        Self {
            max_width: MAX_DECODE_WIDTH,
        }
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn probe(&self, path: &Path, control: &EvalControl) -> Result<VideoMeta> {
        // ffprobe applies display rotation, which the raw stream parameters do not.
        probe_video(path, Some(control))
    }

    fn decode_at(
        &self,
        path: &Path,
        meta: &VideoMeta,
        point: &SamplePoint,
        control: &EvalControl,
    ) -> Result<FrameSample> {
        let mut input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let time_base = input_stream.time_base();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let mut decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let seek_to = (point.timestamp_secs * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        input
            .seek(seek_to, ..seek_to)
            .with_context(|| format!("seek to {:.2}s failed", point.timestamp_secs))?;
        let target_pts = if time_base.numerator() > 0 {
            (point.timestamp_secs * f64::from(time_base.denominator())
                / f64::from(time_base.numerator())) as i64
        } else {
            0
        };

        // The decoder reports coded dimensions; the output follows probed display size.
        let (out_w, out_h) = decode_size(meta.width, meta.height, self.max_width);
        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            out_w,
            out_h,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        let mut accept = |decoded: &ffmpeg::frame::Video| -> Result<Option<FrameSample>> {
            if decoded.timestamp().is_some_and(|pts| pts < target_pts) {
                return Ok(None);
            }
            scaler
                .run(decoded, &mut rgb_frame)
                .context("scale frame to RGB")?;
            let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
            Ok(Some(FrameSample::new(
                point.index,
                point.frame_number,
                point.timestamp_secs,
                width,
                height,
                pixels,
            )))
        };

        for (stream, packet) in input.packets() {
            if stream.index() != stream_index {
                continue;
            }
            control.checkpoint()?;
            decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            while decoder.receive_frame(&mut decoded).is_ok() {
                if let Some(sample) = accept(&decoded)? {
                    return Ok(sample);
                }
            }
        }
        decoder.send_eof().context("flush ffmpeg decoder")?;
        while decoder.receive_frame(&mut decoded).is_ok() {
            if let Some(sample) = accept(&decoded)? {
                return Ok(sample);
            }
        }
        Err(anyhow!(
            "no frame decoded at or after {:.2}s",
            point.timestamp_secs
        ))
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame buffer is short")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
