use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{
    AggregatorConfig, RejectionPolicy, Thresholds, DEFAULT_FACE_CONFIDENCE, DEFAULT_MIN_TEXT_LENGTH,
    DEFAULT_OCR_CONFIDENCE,
};
use crate::batch::DEFAULT_WORKERS;
use crate::detect::{self, select_device, ComputeDevice, DetectorSettings, DeviceCapabilities};
use crate::download::{Downloader, YtDlpDownloader, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_MAX_DURATION_SECS};
use crate::orientation::DEFAULT_ASPECT_THRESHOLD;
use crate::pipeline::{PipelineSettings, VideoPipeline, DEFAULT_VIDEO_TIMEOUT};
use crate::sampler::{FileDecoder, FrameSampler, DEFAULT_SAMPLE_COUNT};
use crate::scrape::{DEFAULT_MAX_RESULTS, DEFAULT_REQUEST_DELAY};
use crate::{parse_platforms, DurationRange, FilterSet, Platform};

const DEFAULT_TEMP_DIR: &str = "tmp";
const DEFAULT_OUTPUT_DIR: &str = "outputs";
const DEFAULT_MIN_SECS: f64 = 0.0;
const DEFAULT_MAX_SECS: f64 = 60.0;

#[derive(Debug, Deserialize, Default)]
struct RunConfigFile {
    duration: Option<String>,
    filters: Option<String>,
    platforms: Option<Vec<String>>,
    max_results: Option<usize>,
    exhaustive_reasons: Option<bool>,
    paths: Option<PathsConfigFile>,
    detection: Option<DetectionConfigFile>,
    download: Option<DownloadConfigFile>,
    batch: Option<BatchConfigFile>,
    detectors: Option<DetectorsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PathsConfigFile {
    temp_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    face_confidence: Option<f32>,
    ocr_confidence: Option<f32>,
    min_text_length: Option<usize>,
    face_reject_fraction: Option<f32>,
    text_reject_fraction: Option<f32>,
    sample_count: Option<usize>,
    aspect_threshold: Option<f64>,
    use_gpu: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DownloadConfigFile {
    timeout_secs: Option<u64>,
    max_duration_secs: Option<u64>,
    request_delay_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct BatchConfigFile {
    workers: Option<usize>,
    video_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorsConfigFile {
    face_backend: Option<String>,
    text_backend: Option<String>,
    face_model: Option<PathBuf>,
    text_model: Option<PathBuf>,
    model_input: Option<[u32; 2]>,
}

/// Fully resolved run configuration: defaults, then `VIDSIFT_CONFIG`, then env.
/// CLI flags are applied by the binary on top of this, followed by `validate`.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub duration_range: DurationRange,
    pub filters: FilterSet,
    pub platforms: Vec<Platform>,
    pub max_results: usize,
    pub thresholds: Thresholds,
    pub face_policy: RejectionPolicy,
    pub text_policy: RejectionPolicy,
    pub sample_count: usize,
    pub aspect_threshold: f64,
    pub use_gpu: bool,
    pub exhaustive_reasons: bool,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub download_timeout: Duration,
    pub max_duration_secs: u64,
    pub request_delay: Duration,
    pub workers: usize,
    pub video_timeout: Duration,
    pub detectors: DetectorSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_range: DurationRange {
                min_secs: DEFAULT_MIN_SECS,
                max_secs: DEFAULT_MAX_SECS,
            },
            filters: FilterSet::all(),
            platforms: Platform::ALL.to_vec(),
            max_results: DEFAULT_MAX_RESULTS,
            thresholds: Thresholds::default(),
            face_policy: RejectionPolicy::Strict,
            text_policy: RejectionPolicy::Strict,
            sample_count: DEFAULT_SAMPLE_COUNT,
            aspect_threshold: DEFAULT_ASPECT_THRESHOLD,
            use_gpu: false,
            exhaustive_reasons: false,
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            request_delay: DEFAULT_REQUEST_DELAY,
            workers: DEFAULT_WORKERS,
            video_timeout: DEFAULT_VIDEO_TIMEOUT,
            detectors: DetectorSettings::default(),
        }
    }
}

impl RunConfig {
    /// Defaults, optional `VIDSIFT_CONFIG` file, environment. Not yet validated.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VIDSIFT_CONFIG").ok();
        let file_cfg = match config_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: RunConfigFile) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(duration) = file.duration {
            cfg.duration_range = duration.parse()?;
        }
        if let Some(filters) = file.filters {
            cfg.filters = filters.parse()?;
        }
        if let Some(platforms) = file.platforms {
            cfg.platforms = parse_platforms(&platforms.join(","))?;
        }
        cfg.max_results = file.max_results.unwrap_or(cfg.max_results);
        cfg.exhaustive_reasons = file.exhaustive_reasons.unwrap_or(false);

        if let Some(paths) = file.paths {
            cfg.temp_dir = paths.temp_dir.unwrap_or(cfg.temp_dir);
            cfg.output_dir = paths.output_dir.unwrap_or(cfg.output_dir);
        }
        if let Some(detection) = file.detection {
            cfg.thresholds = Thresholds {
                face_confidence: detection.face_confidence.unwrap_or(DEFAULT_FACE_CONFIDENCE),
                ocr_confidence: detection.ocr_confidence.unwrap_or(DEFAULT_OCR_CONFIDENCE),
                min_text_length: detection.min_text_length.unwrap_or(DEFAULT_MIN_TEXT_LENGTH),
            };
            cfg.face_policy = policy(detection.face_reject_fraction);
            cfg.text_policy = policy(detection.text_reject_fraction);
            cfg.sample_count = detection.sample_count.unwrap_or(cfg.sample_count);
            cfg.aspect_threshold = detection.aspect_threshold.unwrap_or(cfg.aspect_threshold);
            cfg.use_gpu = detection.use_gpu.unwrap_or(false);
        }
        if let Some(download) = file.download {
            if let Some(secs) = download.timeout_secs {
                cfg.download_timeout = Duration::from_secs(secs);
            }
            cfg.max_duration_secs = download.max_duration_secs.unwrap_or(cfg.max_duration_secs);
            if let Some(delay) = download.request_delay_secs {
                cfg.request_delay = seconds_f64("download.request_delay_secs", delay)?;
            }
        }
        if let Some(batch) = file.batch {
            cfg.workers = batch.workers.unwrap_or(cfg.workers);
            if let Some(secs) = batch.video_timeout_secs {
                cfg.video_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(detectors) = file.detectors {
            let defaults = DetectorSettings::default();
            cfg.detectors = DetectorSettings {
                face_backend: detectors.face_backend.unwrap_or(defaults.face_backend),
                text_backend: detectors.text_backend.unwrap_or(defaults.text_backend),
                face_model: detectors.face_model,
                text_model: detectors.text_model,
                model_input: detectors
                    .model_input
                    .map(|[w, h]| (w, h))
                    .unwrap_or(defaults.model_input),
            };
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_parsed::<f32>("FACE_CONFIDENCE")? {
            self.thresholds.face_confidence = value;
        }
        if let Some(value) = env_parsed::<f32>("OCR_CONFIDENCE")? {
            self.thresholds.ocr_confidence = value;
        }
        if let Some(value) = env_parsed::<usize>("MIN_TEXT_LENGTH")? {
            self.thresholds.min_text_length = value;
        }
        if let Some(value) = env_nonempty("USE_GPU") {
            self.use_gpu = matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(value) = env_nonempty("TEMP_DIR") {
            self.temp_dir = PathBuf::from(value);
        }
        if let Some(value) = env_nonempty("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(value);
        }
        if let Some(secs) = env_parsed::<u64>("DOWNLOAD_TIMEOUT")? {
            self.download_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parsed::<u64>("MAX_DURATION")? {
            self.max_duration_secs = secs;
        }
        if let Some(secs) = env_parsed::<f64>("REQUEST_DELAY")? {
            self.request_delay = seconds_f64("REQUEST_DELAY", secs)?;
        }
        if let Some(workers) = env_parsed::<usize>("VIDSIFT_WORKERS")? {
            self.workers = workers;
        }
        if let Some(count) = env_parsed::<usize>("VIDSIFT_SAMPLE_COUNT")? {
            self.sample_count = count;
        }
        if let Some(secs) = env_parsed::<u64>("VIDSIFT_VIDEO_TIMEOUT_SECS")? {
            self.video_timeout = Duration::from_secs(secs);
        }
        if let Some(fraction) = env_parsed::<f32>("VIDSIFT_FACE_REJECT_FRACTION")? {
            self.face_policy = RejectionPolicy::Fraction(fraction);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        DurationRange::new(self.duration_range.min_secs, self.duration_range.max_secs)?;
        if self.platforms.is_empty() {
            return Err(anyhow!("at least one platform is required"));
        }
        if self.max_results == 0 {
            return Err(anyhow!("max results per platform must be at least 1"));
        }
        unit("face confidence", self.thresholds.face_confidence)?;
        unit("ocr confidence", self.thresholds.ocr_confidence)?;
        for (name, policy) in [("face", self.face_policy), ("text", self.text_policy)] {
            if let RejectionPolicy::Fraction(fraction) = policy {
                // `flagged / evaluated > 1.0` never holds, so 1.0 would disable the filter.
                if !(fraction > 0.0 && fraction < 1.0) {
                    return Err(anyhow!("{} reject fraction must be in (0, 1) (got {})", name, fraction));
                }
            }
        }
        if self.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        if self.sample_count == 0 {
            return Err(anyhow!("sample count must be at least 1"));
        }
        if self.video_timeout.is_zero() {
            return Err(anyhow!("per-video timeout must be greater than zero"));
        }
        if self.download_timeout.is_zero() {
            return Err(anyhow!("download timeout must be greater than zero"));
        }
        if !(self.aspect_threshold.is_finite() && self.aspect_threshold > 0.0) {
            return Err(anyhow!("aspect threshold must be positive"));
        }
        Ok(())
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            thresholds: self.thresholds,
            face_policy: self.face_policy,
            text_policy: self.text_policy,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            filters: self.filters,
            duration_range: self.duration_range,
            aggregator: self.aggregator_config(),
            aspect_threshold: self.aspect_threshold,
            video_timeout: self.video_timeout,
            exhaustive: self.exhaustive_reasons,
            temp_dir: self.temp_dir.clone(),
        }
    }
}

impl RunConfig {
    /// Resolve the compute device once for the whole run.
    pub fn compute_device(&self) -> ComputeDevice {
        let capabilities = if self.use_gpu {
            DeviceCapabilities::detect()
        } else {
            DeviceCapabilities::cpu_only()
        };
        select_device(self.use_gpu, &capabilities)
    }

    pub fn downloader(&self) -> YtDlpDownloader {
        YtDlpDownloader::new(self.download_timeout, self.max_duration_secs)
    }

    /// Wire detectors, sampler and downloader into a pipeline.
    pub fn build_pipeline(&self, device: ComputeDevice, downloader: Arc<dyn Downloader>) -> Result<VideoPipeline> {
        let registry = detect::build_registry(&self.detectors, device)?;
        let detectors = detect::bind_detectors(&registry, &self.detectors, &self.filters)?;
        let sampler = FrameSampler::new(Arc::new(FileDecoder::new()), self.sample_count);
        log::info!(
            "pipeline: filters={} range={}s decoder={} samples={} device={}",
            self.filters,
            self.duration_range,
            sampler.decoder_name(),
            self.sample_count,
            device
        );
        VideoPipeline::new(self.pipeline_settings(), downloader, sampler, detectors)
    }
}

fn read_config_file(path: &Path) -> Result<RunConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn policy(fraction: Option<f32>) -> RejectionPolicy {
    fraction.map_or(RejectionPolicy::Strict, RejectionPolicy::Fraction)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_nonempty(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
        None => Ok(None),
    }
}

fn seconds_f64(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("{} must be a non-negative number of seconds", name))
}

fn unit(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(anyhow!("{} must be within [0, 1] (got {})", name, value))
    }
}
