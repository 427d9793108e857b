#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vidsift::detect::{BackendRegistry, DetectionKind, DetectorBackend, Detectors, ScriptedBackend};
use vidsift::download::{Downloader, TempVideo};
use vidsift::error::EvalError;
use vidsift::frame::{FrameSample, VideoMeta};
use vidsift::sampler::{FrameDecoder, SamplePoint, SyntheticDecoder, SyntheticVideo};
use vidsift::{CandidateVideo, EvalControl, FilterSet};

/// Writes a synthetic descriptor into the temp slot for known URLs; fails for the rest.
#[derive(Default)]
pub struct ScriptedDownloader {
    videos: HashMap<String, SyntheticVideo>,
    produced: Mutex<Vec<PathBuf>>,
    attempts: AtomicUsize,
}

impl ScriptedDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video(mut self, url: &str, video: SyntheticVideo) -> Self {
        self.videos.insert(url.to_string(), video);
        self
    }

    pub fn produced(&self) -> Vec<PathBuf> {
        self.produced.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Downloader for ScriptedDownloader {
    fn download(
        &self,
        candidate: &CandidateVideo,
        temp: &mut TempVideo,
        control: &EvalControl,
    ) -> Result<(), EvalError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        control.checkpoint()?;
        let Some(video) = self.videos.get(&candidate.url) else {
            return Err(EvalError::Download("HTTP Error 403: Forbidden".into()));
        };
        let path = temp.dir().join(format!("{}.synthetic.json", temp.stem()));
        video
            .write_to(&path)
            .map_err(|e| EvalError::Download(e.to_string()))?;
        temp.set_path(path.clone());
        self.produced.lock().unwrap().push(path);
        Ok(())
    }
}

/// Synthetic decoder that counts probes and frame decodes.
#[derive(Default)]
pub struct CountingDecoder {
    inner: SyntheticDecoder,
    probes: AtomicUsize,
    decodes: AtomicUsize,
}

impl CountingDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl FrameDecoder for CountingDecoder {
    fn name(&self) -> &'static str {
        "counting-synthetic"
    }

    fn probe(&self, path: &Path, control: &EvalControl) -> anyhow::Result<VideoMeta> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.inner.probe(path, control)
    }

    fn decode_at(
        &self,
        path: &Path,
        meta: &VideoMeta,
        point: &SamplePoint,
        control: &EvalControl,
    ) -> anyhow::Result<FrameSample> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.inner.decode_at(path, meta, point, control)
    }
}

/// Bind the scripted backends for whichever frame filters are active.
pub fn scripted_detectors(
    face: &Arc<ScriptedBackend>,
    text: &Arc<ScriptedBackend>,
    filters: &FilterSet,
) -> Detectors {
    let mut registry = BackendRegistry::new();
    registry.register_shared(face.clone());
    registry.register_shared(text.clone());
    let mut detectors = Detectors::none();
    if filters.faces {
        detectors.face = Some(Arc::new(
            registry.handle(face.name(), DetectionKind::Face).unwrap(),
        ));
    }
    if filters.text {
        detectors.text = Some(Arc::new(
            registry.handle(text.name(), DetectionKind::Text).unwrap(),
        ));
    }
    detectors
}

/// Files still present in `dir`.
pub fn leftovers(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.flatten().map(|e| e.path()).collect())
        .unwrap_or_default()
}
