//! Run outputs.
//!
//! - `results.json`: every verdict, completion order, fixed key order
//! - `accepted_list.txt`: one numbered line per accepted video
//! - `run.json`: run parameters and counts
//!
//! All three are written even when every video failed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::aggregate::FrameEvidence;
use crate::batch::{BatchParams, BatchResult};
use crate::error::FilterReason;
use crate::pipeline::{EvalState, VideoVerdict};
use crate::Platform;

pub const RESULTS_FILE: &str = "results.json";
pub const ACCEPTED_FILE: &str = "accepted_list.txt";
pub const RUN_FILE: &str = "run.json";

/// One `results.json` entry. Field order is the serialized key order.
#[derive(Clone, Debug, Serialize)]
pub struct VerdictRecord {
    pub title: String,
    pub url: String,
    pub platform: Platform,
    pub duration_sec: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub resolution: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub status: &'static str,
    pub reasons: Vec<FilterReason>,
    pub evidence: FrameEvidence,
    pub state: EvalState,
}

impl From<&VideoVerdict> for VerdictRecord {
    fn from(verdict: &VideoVerdict) -> Self {
        let meta = verdict.meta.as_ref();
        let duration_sec = meta
            .map(|m| m.duration_secs)
            .filter(|d| *d > 0.0)
            .or(verdict.candidate.duration_secs)
            .map(|d| (d * 10.0).round() / 10.0);
        Self {
            title: verdict.candidate.title.clone(),
            url: verdict.candidate.url.clone(),
            platform: verdict.candidate.platform,
            duration_sec,
            width: meta.map(|m| m.width),
            height: meta.map(|m| m.height),
            resolution: meta.map(|m| m.resolution()),
            discovered_at: verdict.candidate.discovered_at,
            processed_at: verdict.processed_at,
            status: if verdict.accepted { "accepted" } else { "rejected" },
            reasons: verdict.reasons.clone(),
            evidence: verdict.evidence,
            state: verdict.final_state,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary<'a> {
    pub params: &'a BatchParams,
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub cancelled: bool,
    pub reasons: BTreeMap<&'static str, usize>,
    pub written_at: DateTime<Utc>,
}

impl<'a> RunSummary<'a> {
    pub fn from_result(result: &'a BatchResult) -> Self {
        Self {
            params: &result.params,
            total: result.verdicts.len(),
            accepted: result.accepted_count(),
            rejected: result.rejected_count(),
            cancelled: result.cancelled,
            reasons: result
                .reason_histogram()
                .into_iter()
                .map(|(code, n)| (code.as_str(), n))
                .collect(),
            written_at: Utc::now(),
        }
    }
}

/// `N) "title" - url (D s, WxH, Platform)`
pub fn accepted_line(n: usize, verdict: &VideoVerdict) -> String {
    let record = VerdictRecord::from(verdict);
    let duration = record
        .duration_sec
        .map(|d| format!("{} s", d))
        .unwrap_or_else(|| "? s".to_string());
    let resolution = record.resolution.unwrap_or_else(|| "?".to_string());
    format!(
        "{}) \"{}\" - {} ({}, {}, {})",
        n,
        record.title.replace(['\n', '\r'], " "),
        record.url,
        duration,
        resolution,
        record.platform.display_name()
    )
}

pub fn render_accepted_list(result: &BatchResult) -> String {
    let mut out = String::new();
    for (i, verdict) in result.accepted().enumerate() {
        out.push_str(&accepted_line(i + 1, verdict));
        out.push('\n');
    }
    out
}

#[derive(Clone, Debug)]
pub struct ReportPaths {
    pub results: PathBuf,
    pub accepted: PathBuf,
    pub run: PathBuf,
}

/// Write all three outputs into `output_dir`.
pub fn write_reports(output_dir: &Path, result: &BatchResult) -> Result<ReportPaths> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;

    let paths = ReportPaths {
        results: output_dir.join(RESULTS_FILE),
        accepted: output_dir.join(ACCEPTED_FILE),
        run: output_dir.join(RUN_FILE),
    };

    let records: Vec<VerdictRecord> = result.verdicts.iter().map(VerdictRecord::from).collect();
    write_file(&paths.results, &serde_json::to_vec_pretty(&records)?)?;
    write_file(&paths.accepted, render_accepted_list(result).as_bytes())?;
    write_file(
        &paths.run,
        &serde_json::to_vec_pretty(&RunSummary::from_result(result))?,
    )?;

    log::info!(
        "wrote {} record(s) to {}, {} accepted",
        records.len(),
        paths.results.display(),
        result.accepted_count()
    );
    Ok(paths)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to move {} into place", path.display()))
}

/// Log the end-of-run summary with a per-reason breakdown.
pub fn log_summary(result: &BatchResult) {
    log::info!(
        "{} video(s) processed: {} accepted, {} rejected{}",
        result.verdicts.len(),
        result.accepted_count(),
        result.rejected_count(),
        if result.cancelled { " (cancelled)" } else { "" }
    );
    for (code, count) in result.reason_histogram() {
        log::info!("  {:<22} {}", code.as_str(), count);
    }
}
