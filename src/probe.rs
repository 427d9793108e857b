//! Container metadata via `ffprobe`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::control::EvalControl;
use crate::frame::VideoMeta;
use crate::tools::{run_bounded, Tool};

const PROBE_LIMIT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    streams: Option<Vec<ProbeStream>>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    tags: Option<ProbeTags>,
    side_data_list: Option<Vec<ProbeSideData>>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Run ffprobe on a local file. With a control, cancellation and the deadline kill it.
pub fn probe_video(path: &Path, control: Option<&EvalControl>) -> Result<VideoMeta> {
    let mut cmd = Command::new(Tool::Ffprobe.program());
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(path);
    let output = run_bounded(&mut cmd, PROBE_LIMIT, control)
        .with_context(|| format!("ffprobe failed on {}", path.display()))?;
    parse_probe_output(&output.stdout)
}

/// Parse `ffprobe -print_format json` output into display-oriented metadata.
pub fn parse_probe_output(raw: &[u8]) -> Result<VideoMeta> {
    let probe: ProbeOutput =
        serde_json::from_slice(raw).context("failed to parse ffprobe output")?;
    let stream = probe
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow!("file has no video stream"))?;

    let mut width = stream.width.unwrap_or(0);
    let mut height = stream.height.unwrap_or(0);
    if quarter_turn(&stream) {
        std::mem::swap(&mut width, &mut height);
    }

    let duration_secs = probe
        .format
        .and_then(|f| parse_f64(f.duration.as_deref()))
        .or_else(|| parse_f64(stream.duration.as_deref()))
        .unwrap_or(0.0);

    let frame_rate = parse_frame_rate(stream.avg_frame_rate.as_deref())
        .or_else(|| parse_frame_rate(stream.r_frame_rate.as_deref()));
    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0);

    Ok(VideoMeta {
        width,
        height,
        duration_secs,
        frame_rate,
        frame_count,
    })
}

fn quarter_turn(stream: &ProbeStream) -> bool {
    let rotation = stream
        .side_data_list
        .as_ref()
        .and_then(|list| list.iter().find_map(|side| side.rotation))
        .or_else(|| {
            stream
                .tags
                .as_ref()
                .and_then(|tags| parse_f64(tags.rotate.as_deref()))
        })
        .unwrap_or(0.0);
    (rotation.round() as i64).rem_euclid(180) == 90
}

/// Parse frame rate string like "30000/1001". "0/0" yields `None`.
fn parse_frame_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_f64(value: Option<&str>) -> Option<f64> {
    value?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_portrait_stream() {
        let raw = br#"{
            "streams": [
                {"codec_type": "audio"},
                {"codec_type": "video", "width": 1080, "height": 1920,
                 "avg_frame_rate": "30000/1001", "nb_frames": "1349"}
            ],
            "format": {"duration": "45.011"}
        }"#;
        let meta = parse_probe_output(raw).unwrap();
        assert_eq!((meta.width, meta.height), (1080, 1920));
        assert!((meta.duration_secs - 45.011).abs() < 1e-9);
        assert!((meta.frame_rate.unwrap() - 29.97).abs() < 0.01);
        assert_eq!(meta.frame_count, Some(1349));
    }

    #[test]
    fn rotated_landscape_is_reported_as_portrait() {
        let raw = br#"{
            "streams": [{"codec_type": "video", "width": 1920, "height": 1080,
                         "r_frame_rate": "30/1",
                         "side_data_list": [{"rotation": -90}]}],
            "format": {"duration": "12.5"}
        }"#;
        let meta = parse_probe_output(raw).unwrap();
        assert_eq!((meta.width, meta.height), (1080, 1920));
    }

    #[test]
    fn missing_video_stream_is_an_error() {
        let raw = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3"}}"#;
        assert!(parse_probe_output(raw).is_err());
    }

    #[test]
    fn zero_frame_rate_is_none() {
        assert_eq!(parse_frame_rate(Some("0/0")), None);
        assert_eq!(parse_frame_rate(Some("25")), Some(25.0));
    }
}
