//! vidsift_check - run one local video through the filters
//!
//! Accepts a file path or a synthetic `stub://WIDTHxHEIGHT/DURATION[/FPS]` path and
//! prints the verdict record as JSON. The input file is never deleted.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use vidsift::config::RunConfig;
use vidsift::download::LocalFileDownloader;
use vidsift::report::VerdictRecord;
use vidsift::{CancelToken, CandidateVideo, DurationRange, FilterSet, PendingVideo, Platform};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file or stub:// path.
    path: String,
    /// Accepted duration range in seconds, MIN-MAX.
    #[arg(long, value_name = "MIN-MAX")]
    duration: Option<DurationRange>,
    /// Active filters: comma list of vertical,faces,text, or "none".
    #[arg(long)]
    filters: Option<FilterSet>,
    /// Frames to sample.
    #[arg(long)]
    samples: Option<usize>,
    /// Platform recorded in the output.
    #[arg(long, default_value = "youtube")]
    platform: Platform,
    /// Title recorded in the output.
    #[arg(long)]
    title: Option<String>,
    /// Report every failing check instead of stopping at the first cheap one.
    #[arg(long)]
    exhaustive: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = RunConfig::load()?;
    if let Some(range) = args.duration {
        cfg.duration_range = range;
    }
    if let Some(filters) = args.filters {
        cfg.filters = filters;
    }
    if let Some(samples) = args.samples {
        cfg.sample_count = samples;
    }
    cfg.exhaustive_reasons |= args.exhaustive;
    cfg.validate()?;

    let pipeline = cfg.build_pipeline(cfg.compute_device(), Arc::new(LocalFileDownloader))?;

    let title = args.title.clone().unwrap_or_else(|| {
        PathBuf::from(&args.path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| args.path.clone())
    });
    let candidate = CandidateVideo::new(args.platform, args.path.clone(), title);
    let verdict = pipeline.evaluate(PendingVideo::new(candidate), &CancelToken::new());

    let record = VerdictRecord::from(&verdict);
    println!("{}", serde_json::to_string_pretty(&record)?);
    log::info!(
        "{} in {} ms, {} detector call(s)",
        if verdict.accepted { "accepted" } else { "rejected" },
        verdict.elapsed_ms,
        pipeline.detectors().invocations()
    );
    Ok(())
}
