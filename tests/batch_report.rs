mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{leftovers, scripted_detectors, ScriptedDownloader};
use vidsift::batch::{BatchCoordinator, BatchParams};
use vidsift::detect::{self, ComputeDevice, DetectorSettings, ScriptedBackend};
use vidsift::download::{Downloader, TempVideo};
use vidsift::pipeline::{PipelineSettings, VideoPipeline};
use vidsift::report::write_reports;
use vidsift::sampler::{FileDecoder, FrameSampler, SyntheticDecoder, SyntheticVideo};
use vidsift::{
    CancelToken, CandidateVideo, DurationRange, EvalControl, EvalError, FilterSet, Platform,
    ReasonCode,
};

fn range() -> DurationRange {
    DurationRange::new(30.0, 60.0).unwrap()
}

fn params(platforms: Vec<Platform>) -> BatchParams {
    BatchParams {
        keyword: "sunset".into(),
        duration_range: range(),
        filters: FilterSet::all(),
        platforms,
        max_per_platform: 10,
    }
}

/// Pipeline on the default detector stack (heuristic face + text).
fn pipeline(temp_dir: &std::path::Path, downloader: Arc<dyn Downloader>) -> Arc<VideoPipeline> {
    let filters = FilterSet::all();
    let settings = DetectorSettings::default();
    let registry = detect::build_registry(&settings, ComputeDevice::Cpu).unwrap();
    let detectors = detect::bind_detectors(&registry, &settings, &filters).unwrap();
    let sampler = FrameSampler::new(Arc::new(FileDecoder::new()), 10);
    let settings = PipelineSettings::new(filters, range(), temp_dir);
    Arc::new(VideoPipeline::new(settings, downloader, sampler, detectors).unwrap())
}

#[test]
fn mixed_batch_produces_one_accepted_line() {
    let temp = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let downloader = Arc::new(
        ScriptedDownloader::new()
            .video("https://tiktok.com/v/clean", SyntheticVideo::new(1080, 1920, 45.0))
            .video(
                "https://tiktok.com/v/captioned",
                SyntheticVideo::new(1080, 1920, 45.0).with_caption(),
            ),
    );
    let coordinator = BatchCoordinator::new(
        pipeline(temp.path(), downloader.clone()),
        2,
        CancelToken::new(),
    );
    let candidates = vec![
        CandidateVideo::new(Platform::Tiktok, "https://tiktok.com/v/clean", "Clean sunset"),
        CandidateVideo::new(Platform::Tiktok, "https://tiktok.com/v/captioned", "Captioned"),
        CandidateVideo::new(Platform::Tiktok, "https://tiktok.com/v/blocked", "Blocked"),
    ];

    let progress_calls = AtomicUsize::new(0);
    let progress = |_: &vidsift::VideoVerdict, done: usize, total: usize| {
        assert!(done <= total);
        progress_calls.fetch_add(1, Ordering::SeqCst);
    };
    let result = coordinator
        .run(params(vec![Platform::Tiktok]), candidates, Some(&progress))
        .unwrap();

    assert_eq!(result.verdicts.len(), 3);
    assert_eq!(progress_calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.accepted_count(), 1);
    let by_url = |url: &str| {
        result
            .verdicts
            .iter()
            .find(|v| v.candidate.url == url)
            .unwrap()
    };
    assert!(by_url("https://tiktok.com/v/clean").accepted);
    assert_eq!(
        by_url("https://tiktok.com/v/captioned").reason_codes(),
        vec![ReasonCode::TextDetected]
    );
    assert_eq!(
        by_url("https://tiktok.com/v/blocked").reason_codes(),
        vec![ReasonCode::DownloadFailed]
    );

    let paths = write_reports(out.path(), &result).unwrap();
    let accepted = std::fs::read_to_string(&paths.accepted).unwrap();
    assert_eq!(accepted.lines().count(), 1);
    assert!(accepted.starts_with("1) \"Clean sunset\" - https://tiktok.com/v/clean (45 s, 1080x1920, TikTok)"));

    let records: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&paths.results).unwrap()).unwrap();
    assert_eq!(records.as_array().unwrap().len(), 3);

    assert!(leftovers(temp.path()).is_empty());
}

#[test]
fn duplicates_and_unrequested_platforms_are_dropped() {
    let temp = tempfile::tempdir().unwrap();
    let downloader = Arc::new(
        ScriptedDownloader::new().video("https://youtu.be/a", SyntheticVideo::new(1080, 1920, 45.0)),
    );
    let coordinator = BatchCoordinator::new(
        pipeline(temp.path(), downloader.clone()),
        3,
        CancelToken::new(),
    );
    let candidates = vec![
        CandidateVideo::new(Platform::Youtube, "https://youtu.be/a", "a"),
        CandidateVideo::new(Platform::Youtube, "https://youtu.be/a", "a again"),
        CandidateVideo::new(Platform::Instagram, "https://instagram.com/p/b", "b"),
    ];
    let result = coordinator
        .run(params(vec![Platform::Youtube]), candidates, None)
        .unwrap();

    assert_eq!(result.verdicts.len(), 1);
    assert_eq!(downloader.attempts(), 1);
}

struct PanickingDownloader;

impl Downloader for PanickingDownloader {
    fn download(
        &self,
        candidate: &CandidateVideo,
        _temp: &mut TempVideo,
        _control: &EvalControl,
    ) -> Result<(), EvalError> {
        if candidate.url.ends_with("boom") {
            panic!("downloader exploded");
        }
        Err(EvalError::Download("offline".into()))
    }
}

#[test]
fn a_panicking_video_does_not_abort_the_batch() {
    let temp = tempfile::tempdir().unwrap();
    let coordinator = BatchCoordinator::new(
        pipeline(temp.path(), Arc::new(PanickingDownloader)),
        2,
        CancelToken::new(),
    );
    let candidates = vec![
        CandidateVideo::new(Platform::Youtube, "https://youtu.be/boom", "boom"),
        CandidateVideo::new(Platform::Youtube, "https://youtu.be/fine", "fine"),
    ];
    let result = coordinator
        .run(params(vec![Platform::Youtube]), candidates, None)
        .unwrap();

    assert_eq!(result.verdicts.len(), 2);
    let boom = result
        .verdicts
        .iter()
        .find(|v| v.candidate.url.ends_with("boom"))
        .unwrap();
    assert_eq!(boom.reason_codes(), vec![ReasonCode::InternalError]);
    assert!(leftovers(temp.path()).is_empty());
}

#[test]
fn cancelled_batch_still_writes_outputs() {
    let temp = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let downloader = Arc::new(
        ScriptedDownloader::new().video("https://youtu.be/a", SyntheticVideo::new(1080, 1920, 45.0)),
    );
    let cancel = CancelToken::new();
    cancel.cancel();
    let coordinator = BatchCoordinator::new(pipeline(temp.path(), downloader.clone()), 2, cancel);
    let result = coordinator
        .run(
            params(vec![Platform::Youtube]),
            vec![CandidateVideo::new(Platform::Youtube, "https://youtu.be/a", "a")],
            None,
        )
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.verdicts[0].reason_codes(), vec![ReasonCode::Cancelled]);
    assert_eq!(downloader.attempts(), 0);

    let paths = write_reports(out.path(), &result).unwrap();
    assert_eq!(std::fs::read_to_string(paths.accepted).unwrap(), "");
}

#[test]
fn empty_platform_set_is_a_configuration_error() {
    let temp = tempfile::tempdir().unwrap();
    let coordinator = BatchCoordinator::new(
        pipeline(temp.path(), Arc::new(ScriptedDownloader::new())),
        1,
        CancelToken::new(),
    );
    assert!(coordinator.run(params(Vec::new()), Vec::new(), None).is_err());
}

/// Four vertical videos through a face-only pipeline on `face`, four workers.
fn run_face_only(face: ScriptedBackend) -> Arc<ScriptedBackend> {
    let temp = tempfile::tempdir().unwrap();
    let urls: Vec<String> = (0..4).map(|i| format!("https://youtu.be/{}", i)).collect();
    let downloader = urls.iter().fold(ScriptedDownloader::new(), |d, url| {
        d.video(url, SyntheticVideo::new(1080, 1920, 45.0))
    });
    let filters = FilterSet {
        text: false,
        ..FilterSet::all()
    };
    let face = Arc::new(face);
    let text = Arc::new(ScriptedBackend::new("scripted-text"));
    let detectors = scripted_detectors(&face, &text, &filters);
    let sampler = FrameSampler::new(Arc::new(SyntheticDecoder::new()), 4);
    let settings = PipelineSettings::new(filters, range(), temp.path());
    let pipeline = VideoPipeline::new(settings, Arc::new(downloader), sampler, detectors).unwrap();

    let coordinator = BatchCoordinator::new(Arc::new(pipeline), 4, CancelToken::new());
    let candidates = urls
        .iter()
        .map(|url| CandidateVideo::new(Platform::Youtube, url, "clip"))
        .collect();
    let mut params = params(vec![Platform::Youtube]);
    params.filters = filters;
    let result = coordinator.run(params, candidates, None).unwrap();

    assert_eq!(result.accepted_count(), 4);
    assert_eq!(face.calls(), 16);
    face
}

#[test]
fn serialized_backend_runs_one_call_at_a_time() {
    let face = run_face_only(
        ScriptedBackend::new("scripted-face")
            .serialized()
            .with_delay(Duration::from_millis(15)),
    );
    assert_eq!(face.peak_in_flight(), 1);
}

#[test]
fn shared_backend_is_called_concurrently() {
    let face = run_face_only(
        ScriptedBackend::new("scripted-face").with_delay(Duration::from_millis(15)),
    );
    assert!(face.peak_in_flight() > 1);
}
