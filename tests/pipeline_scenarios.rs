mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{leftovers, scripted_detectors, CountingDecoder, ScriptedDownloader};
use tempfile::TempDir;
use vidsift::detect::{DetectionResult, Region, ScriptedBackend};
use vidsift::pipeline::{CollectingSink, EvalState, PipelineEvent, PipelineSettings};
use vidsift::sampler::{FrameSampler, SyntheticVideo};
use vidsift::{
    cleanup_path, CancelToken, CandidateVideo, DurationRange, FilterSet, PendingVideo, Platform,
    ReasonCode, VideoPipeline, VideoVerdict,
};

const URL: &str = "https://www.tiktok.com/@someone/video/1";

struct Fixture {
    temp: TempDir,
    face: Arc<ScriptedBackend>,
    text: Arc<ScriptedBackend>,
    decoder: Arc<CountingDecoder>,
    downloader: Arc<ScriptedDownloader>,
    events: Arc<CollectingSink>,
    pipeline: VideoPipeline,
}

fn fixture(
    video: SyntheticVideo,
    face: ScriptedBackend,
    text: ScriptedBackend,
    configure: impl FnOnce(&mut PipelineSettings),
) -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let mut settings = PipelineSettings::new(
        FilterSet::all(),
        DurationRange::new(30.0, 60.0).unwrap(),
        temp.path(),
    );
    configure(&mut settings);

    let face = Arc::new(face);
    let text = Arc::new(text);
    let decoder = Arc::new(CountingDecoder::new());
    let downloader = Arc::new(ScriptedDownloader::new().video(URL, video));
    let events = Arc::new(CollectingSink::new());
    let detectors = scripted_detectors(&face, &text, &settings.filters);
    let sampler = FrameSampler::new(decoder.clone(), 10);
    let pipeline = VideoPipeline::new(settings, downloader.clone(), sampler, detectors)
        .unwrap()
        .with_events(events.clone());
    Fixture {
        temp,
        face,
        text,
        decoder,
        downloader,
        events,
        pipeline,
    }
}

fn evaluate(fx: &Fixture) -> VideoVerdict {
    evaluate_with(fx, &CancelToken::new())
}

fn evaluate_with(fx: &Fixture, cancel: &CancelToken) -> VideoVerdict {
    let candidate = CandidateVideo::new(Platform::Tiktok, URL, "clip").with_duration(45.0);
    fx.pipeline.evaluate(PendingVideo::new(candidate), cancel)
}

fn detector_calls(fx: &Fixture) -> u64 {
    fx.face.calls() + fx.text.calls()
}

fn assert_cleaned(fx: &Fixture) {
    for path in fx.downloader.produced() {
        assert!(!path.exists(), "{} was left on disk", path.display());
    }
    assert!(leftovers(fx.temp.path()).is_empty());
}

#[test]
fn clean_vertical_video_is_accepted() {
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 45.0),
        ScriptedBackend::new("scripted-face"),
        ScriptedBackend::new("scripted-text"),
        |_| {},
    );
    let verdict = evaluate(&fx);

    assert!(verdict.accepted);
    assert!(verdict.reasons.is_empty());
    assert_eq!(verdict.final_state, EvalState::Decided);
    assert_eq!(verdict.evidence.frames_sampled, 10);
    assert_eq!(verdict.evidence.face.evaluated, 10);
    assert_eq!(verdict.evidence.text.evaluated, 10);
    assert_eq!(fx.face.calls(), 10);
    assert_eq!(fx.text.calls(), 10);
    assert_eq!(fx.downloader.produced().len(), 1);
    assert_cleaned(&fx);
}

#[test]
fn horizontal_video_is_rejected_without_detector_calls() {
    let fx = fixture(
        SyntheticVideo::new(1920, 1080, 45.0),
        ScriptedBackend::new("scripted-face"),
        ScriptedBackend::new("scripted-text"),
        |_| {},
    );
    let verdict = evaluate(&fx);

    assert!(!verdict.accepted);
    assert_eq!(verdict.reason_codes(), vec![ReasonCode::NotVertical]);
    assert_eq!(detector_calls(&fx), 0);
    assert_eq!(fx.decoder.decodes(), 0);
    assert_cleaned(&fx);
}

#[test]
fn face_on_one_frame_rejects() {
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 45.0),
        ScriptedBackend::new("scripted-face").at(3, DetectionResult::face(0.5, Region::full_frame())),
        ScriptedBackend::new("scripted-text"),
        |_| {},
    );
    let verdict = evaluate(&fx);

    assert!(!verdict.accepted);
    assert_eq!(verdict.reason_codes(), vec![ReasonCode::FaceDetected]);
    assert_eq!(verdict.evidence.face.flagged, 1);
    // strict mode stops asking for faces after the first flagged frame
    assert_eq!(fx.face.calls(), 4);
    assert_cleaned(&fx);
}

#[test]
fn face_below_threshold_is_ignored() {
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 45.0),
        ScriptedBackend::new("scripted-face").at(3, DetectionResult::face(0.3, Region::full_frame())),
        ScriptedBackend::new("scripted-text").at(5, DetectionResult::text(0.9, 1, Region::full_frame())),
        |_| {},
    );
    let verdict = evaluate(&fx);
    assert!(verdict.accepted, "reasons: {:?}", verdict.reasons);
}

#[test]
fn short_video_never_reaches_the_sampler() {
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 20.0),
        ScriptedBackend::new("scripted-face"),
        ScriptedBackend::new("scripted-text"),
        |_| {},
    );
    let verdict = evaluate(&fx);

    assert!(!verdict.accepted);
    assert_eq!(verdict.reason_codes(), vec![ReasonCode::DurationOutOfRange]);
    assert_eq!(fx.decoder.decodes(), 0);
    assert_eq!(detector_calls(&fx), 0);
    assert_eq!(verdict.evidence.frames_sampled, 0);
    assert_cleaned(&fx);
}

#[test]
fn exhaustive_mode_reports_every_reason() {
    let fx = fixture(
        SyntheticVideo::new(1920, 1080, 45.0),
        ScriptedBackend::new("scripted-face").at(3, DetectionResult::face(0.9, Region::full_frame())),
        ScriptedBackend::new("scripted-text"),
        |settings| settings.exhaustive = true,
    );
    let verdict = evaluate(&fx);

    assert_eq!(
        verdict.reason_codes(),
        vec![ReasonCode::NotVertical, ReasonCode::FaceDetected]
    );
    assert_cleaned(&fx);
}

#[test]
fn download_failure_is_recorded() {
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 45.0),
        ScriptedBackend::new("scripted-face"),
        ScriptedBackend::new("scripted-text"),
        |_| {},
    );
    let candidate = CandidateVideo::new(Platform::Youtube, "https://youtu.be/blocked", "blocked");
    let verdict = fx
        .pipeline
        .evaluate(PendingVideo::new(candidate), &CancelToken::new());

    assert_eq!(verdict.final_state, EvalState::Failed);
    assert_eq!(verdict.reason_codes(), vec![ReasonCode::DownloadFailed]);
    assert_eq!(fx.decoder.probes(), 0);
    assert_eq!(detector_calls(&fx), 0);
    assert_cleaned(&fx);
}

#[test]
fn undecodable_video_is_unreadable() {
    let mut video = SyntheticVideo::new(1080, 1920, 45.0);
    video.fail_decode = true;
    let fx = fixture(
        video,
        ScriptedBackend::new("scripted-face"),
        ScriptedBackend::new("scripted-text"),
        |_| {},
    );
    let verdict = evaluate(&fx);

    assert_eq!(verdict.final_state, EvalState::Failed);
    assert_eq!(verdict.reason_codes(), vec![ReasonCode::UnreadableFile]);
    assert_eq!(detector_calls(&fx), 0);
    assert_cleaned(&fx);
}

#[test]
fn detector_errors_fail_open() {
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 45.0),
        ScriptedBackend::new("scripted-face").failing_at(2).failing_at(7),
        ScriptedBackend::new("scripted-text"),
        |_| {},
    );
    let verdict = evaluate(&fx);

    assert!(verdict.accepted);
    assert_eq!(verdict.evidence.detector_failures, 2);
    let failures = fx
        .events
        .events()
        .into_iter()
        .filter(|event| matches!(event, PipelineEvent::DetectorFailed { .. }))
        .count();
    assert_eq!(failures, 2);
}

#[test]
fn cancelled_before_start_skips_download() {
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 45.0),
        ScriptedBackend::new("scripted-face"),
        ScriptedBackend::new("scripted-text"),
        |_| {},
    );
    let cancel = CancelToken::new();
    cancel.cancel();
    let verdict = evaluate_with(&fx, &cancel);

    assert_eq!(verdict.final_state, EvalState::Cancelled);
    assert_eq!(verdict.reason_codes(), vec![ReasonCode::Cancelled]);
    assert_eq!(fx.downloader.attempts(), 0);
}

#[test]
fn cancellation_mid_detection_discards_in_flight_result() {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 45.0),
        ScriptedBackend::new("scripted-face")
            .at(2, DetectionResult::face(0.99, Region::full_frame()))
            .on_call(move |_, index| {
                if index == 2 {
                    trigger.cancel();
                }
            }),
        ScriptedBackend::new("scripted-text"),
        |_| {},
    );
    let verdict = evaluate_with(&fx, &cancel);

    assert_eq!(verdict.final_state, EvalState::Cancelled);
    // the face found by the interrupted call is not reported
    assert_eq!(verdict.reason_codes(), vec![ReasonCode::Cancelled]);
    assert_eq!(fx.face.calls(), 3);
    assert_eq!(fx.text.calls(), 2);
    assert_cleaned(&fx);
}

#[test]
fn face_found_before_cancellation_is_kept() {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 45.0),
        ScriptedBackend::new("scripted-face").at(1, DetectionResult::face(0.9, Region::full_frame())),
        ScriptedBackend::new("scripted-text").on_call(move |_, index| {
            if index == 4 {
                trigger.cancel();
            }
        }),
        |_| {},
    );
    let verdict = evaluate_with(&fx, &cancel);

    assert_eq!(verdict.final_state, EvalState::Cancelled);
    assert_eq!(
        verdict.reason_codes(),
        vec![ReasonCode::FaceDetected, ReasonCode::Cancelled]
    );
    assert_eq!(verdict.evidence.face.flagged, 1);
    assert_eq!(verdict.evidence.face.evaluated, 2);
    // the text call on sample 4 was interrupted and is not counted
    assert_eq!(verdict.evidence.text.evaluated, 4);
    assert_eq!(fx.text.calls(), 5);
    assert_cleaned(&fx);
}

#[test]
fn frames_completed_before_the_timeout_still_reject() {
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 45.0),
        ScriptedBackend::new("scripted-face").at(0, DetectionResult::face(0.9, Region::full_frame())),
        ScriptedBackend::new("scripted-text").with_delay(Duration::from_millis(60)),
        |settings| {
            settings.video_timeout = Duration::from_millis(150);
        },
    );
    let verdict = evaluate(&fx);

    assert_eq!(verdict.final_state, EvalState::Failed);
    assert_eq!(
        verdict.reason_codes(),
        vec![ReasonCode::FaceDetected, ReasonCode::Timeout]
    );
    assert_cleaned(&fx);
}

#[test]
fn slow_detectors_hit_the_video_timeout() {
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 45.0),
        ScriptedBackend::new("scripted-face").with_delay(Duration::from_millis(60)),
        ScriptedBackend::new("scripted-text"),
        |settings| {
            settings.filters.text = false;
            settings.video_timeout = Duration::from_millis(150);
        },
    );
    let verdict = evaluate(&fx);

    assert_eq!(verdict.final_state, EvalState::Failed);
    assert_eq!(verdict.reason_codes(), vec![ReasonCode::Timeout]);
    assert!(fx.face.calls() < 10);
    assert_cleaned(&fx);
}

#[test]
fn empty_filter_set_only_gates_duration() {
    let fx = fixture(
        SyntheticVideo::new(1920, 1080, 45.0),
        ScriptedBackend::new("scripted-face"),
        ScriptedBackend::new("scripted-text"),
        |settings| settings.filters = FilterSet::none(),
    );
    let verdict = evaluate(&fx);

    assert!(verdict.accepted);
    assert_eq!(fx.decoder.decodes(), 0);
    assert_eq!(detector_calls(&fx), 0);
    assert!(fx.pipeline.detectors().face.is_none());
}

#[test]
fn transitions_follow_the_state_machine() {
    let fx = fixture(
        SyntheticVideo::new(1080, 1920, 45.0),
        ScriptedBackend::new("scripted-face"),
        ScriptedBackend::new("scripted-text"),
        |_| {},
    );
    evaluate(&fx);

    let events = fx.events.events();
    let states: Vec<EvalState> = events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::Transition { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            EvalState::Downloading,
            EvalState::Sampling,
            EvalState::Detecting,
            EvalState::Decided
        ]
    );
    let cleaned = events
        .iter()
        .position(|event| matches!(event, PipelineEvent::CleanedUp { files_removed: 1, .. }))
        .unwrap();
    let verdict = events
        .iter()
        .position(|event| matches!(event, PipelineEvent::Verdict { accepted: true, .. }))
        .unwrap();
    assert!(cleaned < verdict);
}

#[test]
fn repeated_evaluation_is_deterministic() {
    let build = || {
        fixture(
            SyntheticVideo::new(1080, 1920, 45.0),
            ScriptedBackend::new("scripted-face").at(6, DetectionResult::face(0.8, Region::full_frame())),
            ScriptedBackend::new("scripted-text").at(1, DetectionResult::text(0.7, 5, Region::full_frame())),
            |_| {},
        )
    };
    let first = evaluate(&build());
    let second = evaluate(&build());
    assert_eq!(first.reasons, second.reasons);
    assert_eq!(first.evidence, second.evidence);
    assert_eq!(
        first.reason_codes(),
        vec![ReasonCode::FaceDetected, ReasonCode::TextDetected]
    );
}

#[test]
fn cleanup_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("temp_video_x.mp4");
    std::fs::write(&path, b"x").unwrap();
    assert!(cleanup_path(&path));
    assert!(!cleanup_path(&path));
    assert!(!cleanup_path(&dir.path().join("never_existed.mp4")));
}
