//! Video download and temp-file ownership.
//!
//! - `TempVideo`: scoped owner of one video's temp files; released on drop
//! - `cleanup_path`: idempotent single-file removal
//! - `sweep_temp_dir`: removes stale `temp_*` leftovers from crashed runs
//! - `Downloader` / `YtDlpDownloader`: fetches a candidate into its `TempVideo`
//!
//! Every video gets a unique stem (`temp_video_<url hash>_<nonce>`) so concurrent
//! downloads into the shared temp directory never collide.

use anyhow::{Context, Result};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

use crate::control::EvalControl;
use crate::error::EvalError;
use crate::tools::{run_bounded, Tool};
use crate::CandidateVideo;

pub const TEMP_PREFIX: &str = "temp_";
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_DURATION_SECS: u64 = 600;

// -------------------- Cleanup --------------------

/// Remove one file. Missing files are fine; other failures are logged, never raised.
///
/// Returns true when a file was actually removed.
pub fn cleanup_path(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            log::debug!("removed {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!("failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

/// Remove `temp_*` files in `dir`. With `max_age`, only files older than it.
pub fn sweep_temp_dir(dir: &Path, max_age: Option<Duration>) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return 0,
        Err(e) => {
            log::warn!("cannot sweep {}: {}", dir.display(), e);
            return 0;
        }
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        if let Some(max_age) = max_age {
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age <= max_age {
                continue;
            }
        }
        if cleanup_path(&entry.path()) {
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!("swept {} stale temp file(s) from {}", removed, dir.display());
    }
    removed
}

// -------------------- TempVideo --------------------

/// Scoped owner of one video's temp files.
///
/// Owns every file in `dir` whose name starts with the stem, including partial
/// downloads. `release` is idempotent and also runs on drop.
pub struct TempVideo {
    dir: PathBuf,
    stem: String,
    path: Option<PathBuf>,
    owned: bool,
    released: bool,
}

impl TempVideo {
    /// Reserve a unique stem for `candidate` inside `temp_dir`.
    pub fn allocate(temp_dir: &Path, candidate: &CandidateVideo) -> Result<Self> {
        fs::create_dir_all(temp_dir)
            .with_context(|| format!("failed to create temp dir {}", temp_dir.display()))?;
        let digest = hex::encode(Sha256::digest(candidate.url.as_bytes()));
        let nonce: u32 = rand::thread_rng().gen();
        Ok(Self {
            dir: temp_dir.to_path_buf(),
            stem: format!("{}video_{}_{:08x}", TEMP_PREFIX, &digest[..12], nonce),
            path: None,
            owned: true,
            released: false,
        })
    }

    /// Wrap a file the caller owns. Releasing it never deletes anything.
    pub fn external(path: PathBuf) -> Self {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            dir,
            stem: String::new(),
            path: Some(path),
            owned: false,
            released: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// yt-dlp style output template: `<dir>/<stem>.%(ext)s`.
    pub fn output_template(&self) -> PathBuf {
        self.dir.join(format!("{}.%(ext)s", self.stem))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record the finished download.
    pub fn set_path(&mut self, path: PathBuf) {
        self.path = Some(path);
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Files currently on disk that belong to this video.
    pub fn files(&self) -> Vec<PathBuf> {
        if !self.owned || self.stem.is_empty() {
            return Vec::new();
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.file_name().to_string_lossy().starts_with(&self.stem))
                    .map(|e| e.path())
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Delete every file this video owns. Safe to call any number of times.
    pub fn release(&mut self) -> usize {
        if !self.owned {
            self.released = true;
            return 0;
        }
        let mut removed = 0;
        if let Some(path) = &self.path {
            if cleanup_path(path) {
                removed += 1;
            }
        }
        for leftover in self.files() {
            if cleanup_path(&leftover) {
                removed += 1;
            }
        }
        self.released = true;
        removed
    }
}

impl Drop for TempVideo {
    fn drop(&mut self) {
        self.release();
    }
}

// -------------------- Downloaders --------------------

/// Fetches a candidate into its temp slot.
///
/// Safe to retry: a retry first clears whatever a previous attempt left behind.
pub trait Downloader: Send + Sync {
    fn download(
        &self,
        candidate: &CandidateVideo,
        temp: &mut TempVideo,
        control: &EvalControl,
    ) -> Result<(), EvalError>;
}

/// Downloads with yt-dlp.
pub struct YtDlpDownloader {
    timeout: Duration,
    max_duration_secs: u64,
    format: String,
}

impl YtDlpDownloader {
    pub fn new(timeout: Duration, max_duration_secs: u64) -> Self {
        Self {
            timeout,
            max_duration_secs,
            format: "best".to_string(),
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    fn command(&self, candidate: &CandidateVideo, temp: &TempVideo) -> Command {
        let mut cmd = Command::new(Tool::YtDlp.program());
        cmd.arg("--output")
            .arg(temp.output_template())
            .args(["--format", &self.format])
            .args(["--no-playlist", "--no-warnings", "--quiet", "--no-part"])
            .args([
                "--match-filter",
                &format!("!duration | duration <= {}", self.max_duration_secs),
            ])
            .arg(&candidate.url);
        cmd
    }
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_MAX_DURATION_SECS)
    }
}

impl Downloader for YtDlpDownloader {
    fn download(
        &self,
        candidate: &CandidateVideo,
        temp: &mut TempVideo,
        control: &EvalControl,
    ) -> Result<(), EvalError> {
        for stale in temp.files() {
            cleanup_path(&stale);
        }
        let mut cmd = self.command(candidate, temp);
        if let Err(e) = run_bounded(&mut cmd, self.timeout, Some(control)) {
            temp.release();
            return Err(e.into_eval(EvalError::Download));
        }

        let produced = temp
            .files()
            .into_iter()
            .filter(|p| {
                let name = p.to_string_lossy();
                !name.ends_with(".part") && !name.ends_with(".ytdl")
            })
            .max_by_key(|p| fs::metadata(p).map(|m| m.len()).unwrap_or(0));
        match produced {
            Some(path) => {
                log::debug!("downloaded {} -> {}", candidate.url, path.display());
                temp.set_path(path);
                Ok(())
            }
            None => {
                temp.release();
                Err(EvalError::Download(format!(
                    "yt-dlp produced no file (over the {}s cap or unavailable)",
                    self.max_duration_secs
                )))
            }
        }
    }
}

/// Treats the candidate URL as a path the caller already has on disk.
///
/// The file is wrapped with [`TempVideo::external`], so evaluation never deletes it.
/// `stub://` paths pass through for the synthetic decoder.
#[derive(Default)]
pub struct LocalFileDownloader;

impl Downloader for LocalFileDownloader {
    fn download(
        &self,
        candidate: &CandidateVideo,
        temp: &mut TempVideo,
        control: &EvalControl,
    ) -> Result<(), EvalError> {
        control.checkpoint()?;
        let path = PathBuf::from(candidate.url.trim_start_matches("file://"));
        if !candidate.url.starts_with("stub://") && !path.is_file() {
            return Err(EvalError::Download(format!("{} does not exist", path.display())));
        }
        *temp = TempVideo::external(path);
        Ok(())
    }
}
