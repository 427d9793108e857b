//! vidsift - find short vertical videos without faces or on-screen text
//!
//! 1. Searches the requested platforms for the keyword
//! 2. Downloads each candidate into the temp dir
//! 3. Checks duration and orientation, then samples frames for faces and text
//! 4. Writes results.json, accepted_list.txt and run.json to the output dir
//!
//! Ctrl-C cancels in-flight videos at their next checkpoint; outputs are still written.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vidsift::batch::{BatchCoordinator, BatchParams};
use vidsift::config::RunConfig;
use vidsift::download::sweep_temp_dir;
use vidsift::report::{log_summary, write_reports};
use vidsift::scrape::{collect_candidates, SearchQuery, YtDlpScraper};
use vidsift::tools::Tool;
use vidsift::{parse_platforms, CancelToken, DurationRange, FilterSet, VideoVerdict};

#[path = "../ui.rs"]
mod ui;

const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Search keyword.
    keyword: String,
    /// Accepted duration range in seconds, MIN-MAX.
    #[arg(long, value_name = "MIN-MAX")]
    duration: Option<DurationRange>,
    /// Active filters: comma list of vertical,faces,text, or "none".
    #[arg(long)]
    filters: Option<FilterSet>,
    /// Platforms to search (youtube,tiktok,instagram).
    #[arg(long)]
    platforms: Option<String>,
    /// Maximum candidates per platform.
    #[arg(long)]
    max_results: Option<usize>,
    /// Use a GPU for detection when one is available.
    #[arg(long)]
    gpu: bool,
    /// Concurrent video evaluations.
    #[arg(long)]
    workers: Option<usize>,
    /// Directory for results.json and accepted_list.txt.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Directory for downloaded videos.
    #[arg(long)]
    temp_dir: Option<PathBuf>,
    /// Keep detecting after a cheap check failed so every reason is reported.
    #[arg(long)]
    exhaustive: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = RunConfig::load()?;
        apply_args(&mut cfg, &args)?;
        cfg.validate()?;
        cfg
    };
    if args.keyword.trim().is_empty() {
        return Err(anyhow!("keyword must not be empty"));
    }
    for tool in [Tool::YtDlp, Tool::Ffprobe, Tool::Ffmpeg] {
        if !tool.is_available() {
            log::warn!("{} not found; videos will fail until it is installed", tool.program().display());
        }
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::warn!("interrupt received, cancelling in-flight videos");
            cancel.cancel();
        })
        .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    }

    sweep_temp_dir(&cfg.temp_dir, Some(STALE_TEMP_AGE));

    let pipeline = {
        let _stage = ui.stage("Prepare detectors");
        let device = cfg.compute_device();
        Arc::new(cfg.build_pipeline(device, Arc::new(cfg.downloader()))?)
    };

    let candidates = {
        let _stage = ui.stage(&format!("Search '{}'", args.keyword));
        let mut query = SearchQuery::new(args.keyword.clone(), cfg.platforms.clone(), cfg.duration_range);
        query.max_results = cfg.max_results;
        query.request_delay = cfg.request_delay;
        collect_candidates(&YtDlpScraper::new(), &query)
    };
    log::info!("{} candidate(s) found", candidates.len());

    let params = BatchParams {
        keyword: args.keyword.clone(),
        duration_range: cfg.duration_range,
        filters: cfg.filters,
        platforms: cfg.platforms.clone(),
        max_per_platform: cfg.max_results,
    };
    let coordinator = BatchCoordinator::new(pipeline, cfg.workers, cancel);
    let result = {
        let _stage = ui.stage("Evaluate videos");
        let progress = Mutex::new(ui.batch(candidates.len()));
        let report = |verdict: &VideoVerdict, done: usize, total: usize| {
            if let Ok(mut progress) = progress.lock() {
                progress.record(done, total, verdict.accepted, &verdict.candidate.title);
            }
        };
        let result = coordinator.run(params, candidates, Some(&report))?;
        if let Ok(progress) = progress.lock() {
            progress.finish();
        }
        result
    };

    let paths = {
        let _stage = ui.stage("Write reports");
        write_reports(&cfg.output_dir, &result)?
    };
    sweep_temp_dir(&cfg.temp_dir, Some(STALE_TEMP_AGE));
    log_summary(&result);

    println!("results written to {}", paths.results.display());
    println!(
        "{} accepted video(s) listed in {}",
        result.accepted_count(),
        paths.accepted.display()
    );
    Ok(())
}

fn apply_args(cfg: &mut RunConfig, args: &Args) -> Result<()> {
    if let Some(range) = args.duration {
        cfg.duration_range = range;
    }
    if let Some(filters) = args.filters {
        cfg.filters = filters;
    }
    if let Some(platforms) = &args.platforms {
        cfg.platforms = parse_platforms(platforms)?;
    }
    if let Some(max_results) = args.max_results {
        cfg.max_results = max_results;
    }
    if args.gpu {
        cfg.use_gpu = true;
    }
    if let Some(workers) = args.workers {
        cfg.workers = workers;
    }
    if let Some(dir) = &args.output_dir {
        cfg.output_dir = dir.clone();
    }
    if let Some(dir) = &args.temp_dir {
        cfg.temp_dir = dir.clone();
    }
    if args.exhaustive {
        cfg.exhaustive_reasons = true;
    }
    Ok(())
}
