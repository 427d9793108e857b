//! Frame verdict aggregation.
//!
//! Turns per-frame detector output into per-video reasons. Thresholding lives here, not
//! in the detectors, so thresholds can change without touching any backend.
//!
//! Reasons from different kinds accumulate independently. Within a kind, strict mode
//! stops asking for more frames once one frame is flagged; a flagged kind can never be
//! un-flagged by later frames, so stopping early does not change the verdict.

use serde::{Deserialize, Serialize};

use crate::detect::{DetectionKind, DetectionResult};
use crate::error::{order_reasons, FilterReason, ReasonCode};
use crate::FilterSet;

pub const DEFAULT_FACE_CONFIDENCE: f32 = 0.45;
pub const DEFAULT_OCR_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_MIN_TEXT_LENGTH: usize = 2;

// -------------------- Configuration --------------------

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub face_confidence: f32,
    pub ocr_confidence: f32,
    pub min_text_length: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            face_confidence: DEFAULT_FACE_CONFIDENCE,
            ocr_confidence: DEFAULT_OCR_CONFIDENCE,
            min_text_length: DEFAULT_MIN_TEXT_LENGTH,
        }
    }
}

/// How many flagged frames it takes to reject a video for one kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// A single flagged frame rejects.
    #[default]
    Strict,
    /// Reject when `flagged / evaluated` exceeds the fraction.
    Fraction(f32),
}

impl RejectionPolicy {
    pub fn rejects(&self, flagged: u32, evaluated: u32) -> bool {
        match *self {
            RejectionPolicy::Strict => flagged > 0,
            RejectionPolicy::Fraction(fraction) => {
                evaluated > 0 && (flagged as f32 / evaluated as f32) > fraction
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub thresholds: Thresholds,
    pub face_policy: RejectionPolicy,
    pub text_policy: RejectionPolicy,
}

impl AggregatorConfig {
    fn policy(&self, kind: DetectionKind) -> RejectionPolicy {
        match kind {
            DetectionKind::Face => self.face_policy,
            DetectionKind::Text => self.text_policy,
        }
    }
}

// -------------------- Per-frame flagging --------------------

/// True when any face detection meets the face threshold.
pub fn face_flagged(results: &[DetectionResult], thresholds: &Thresholds) -> bool {
    results.iter().any(|r| {
        r.kind == DetectionKind::Face && r.confidence >= thresholds.face_confidence
    })
}

/// True when any text detection meets both the OCR threshold and the minimum length.
pub fn text_flagged(results: &[DetectionResult], thresholds: &Thresholds) -> bool {
    results.iter().any(|r| {
        r.kind == DetectionKind::Text
            && r.confidence >= thresholds.ocr_confidence
            && r.text_len.unwrap_or(0) >= thresholds.min_text_length
    })
}

// -------------------- Evidence --------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindEvidence {
    pub flagged: u32,
    pub evaluated: u32,
}

/// Frame-level counts kept with every verdict.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEvidence {
    pub frames_sampled: u32,
    pub face: KindEvidence,
    pub text: KindEvidence,
    pub detector_failures: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct KindTally {
    active: bool,
    flagged: u32,
    evaluated: u32,
    failures: u32,
    first_flagged: Option<u32>,
    peak_confidence: f32,
}

impl KindTally {
    fn evidence(&self) -> KindEvidence {
        KindEvidence {
            flagged: self.flagged,
            evaluated: self.evaluated,
        }
    }
}

// -------------------- Aggregator --------------------

/// Accumulates detector output for one video.
pub struct FrameVerdictAggregator {
    config: AggregatorConfig,
    frames_sampled: u32,
    face: KindTally,
    text: KindTally,
}

impl FrameVerdictAggregator {
    pub fn new(config: AggregatorConfig, filters: &FilterSet) -> Self {
        Self {
            config,
            frames_sampled: 0,
            face: KindTally {
                active: filters.faces,
                ..KindTally::default()
            },
            text: KindTally {
                active: filters.text,
                ..KindTally::default()
            },
        }
    }

    fn tally(&self, kind: DetectionKind) -> &KindTally {
        match kind {
            DetectionKind::Face => &self.face,
            DetectionKind::Text => &self.text,
        }
    }

    fn tally_mut(&mut self, kind: DetectionKind) -> &mut KindTally {
        match kind {
            DetectionKind::Face => &mut self.face,
            DetectionKind::Text => &mut self.text,
        }
    }

    /// Whether the next frame should be run through the detector for `kind`.
    ///
    /// False when the kind is inactive, or when strict mode already has a flagged frame.
    pub fn wants(&self, kind: DetectionKind) -> bool {
        let tally = self.tally(kind);
        if !tally.active {
            return false;
        }
        !(self.config.policy(kind) == RejectionPolicy::Strict && tally.flagged > 0)
    }

    /// No active kind wants more frames.
    pub fn is_saturated(&self) -> bool {
        DetectionKind::ALL.iter().all(|kind| !self.wants(*kind))
    }

    pub fn begin_frame(&mut self) {
        self.frames_sampled += 1;
    }

    /// Record detector output for one frame. Returns whether the frame was flagged.
    pub fn observe(&mut self, kind: DetectionKind, frame_index: u32, results: &[DetectionResult]) -> bool {
        let thresholds = self.config.thresholds;
        let flagged = match kind {
            DetectionKind::Face => face_flagged(results, &thresholds),
            DetectionKind::Text => text_flagged(results, &thresholds),
        };
        let peak = results
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.confidence)
            .fold(0.0f32, f32::max);
        let tally = self.tally_mut(kind);
        tally.evaluated += 1;
        if flagged {
            tally.flagged += 1;
            tally.first_flagged.get_or_insert(frame_index);
            tally.peak_confidence = tally.peak_confidence.max(peak);
        }
        flagged
    }

    /// A failed detector call counts as evaluated and not flagged.
    pub fn record_failure(&mut self, kind: DetectionKind) {
        let tally = self.tally_mut(kind);
        tally.evaluated += 1;
        tally.failures += 1;
    }

    pub fn evidence(&self) -> FrameEvidence {
        FrameEvidence {
            frames_sampled: self.frames_sampled,
            face: self.face.evidence(),
            text: self.text.evidence(),
            detector_failures: self.face.failures + self.text.failures,
        }
    }

    /// Merge the once-per-video checks with the frame-level decisions.
    pub fn finish(&self, cheap_reasons: Vec<FilterReason>) -> (Vec<FilterReason>, FrameEvidence) {
        let mut reasons = cheap_reasons;
        for kind in DetectionKind::ALL {
            let tally = self.tally(kind);
            if !tally.active || !self.config.policy(kind).rejects(tally.flagged, tally.evaluated) {
                continue;
            }
            let code = match kind {
                DetectionKind::Face => ReasonCode::FaceDetected,
                DetectionKind::Text => ReasonCode::TextDetected,
            };
            let mut detail = format!(
                "{} flagged in {}/{} evaluated frames (peak confidence {:.2})",
                kind, tally.flagged, tally.evaluated, tally.peak_confidence
            );
            if let Some(index) = tally.first_flagged {
                detail.push_str(&format!(", first at sample {}", index));
            }
            reasons.push(FilterReason::new(code, detail));
        }
        order_reasons(&mut reasons);
        let evidence = self.evidence();
        (reasons, evidence)
    }
}

/// Pure decision over fully materialized frame results.
///
/// Each entry in `frames` is the combined detector output for one sampled frame.
pub fn decide(
    config: AggregatorConfig,
    filters: &FilterSet,
    cheap_reasons: Vec<FilterReason>,
    frames: &[Vec<DetectionResult>],
) -> (Vec<FilterReason>, FrameEvidence) {
    let mut aggregator = FrameVerdictAggregator::new(config, filters);
    for (index, results) in frames.iter().enumerate() {
        if aggregator.is_saturated() {
            break;
        }
        aggregator.begin_frame();
        for kind in DetectionKind::ALL {
            if aggregator.wants(kind) {
                aggregator.observe(kind, index as u32, results);
            }
        }
    }
    aggregator.finish(cheap_reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Region;

    fn face(confidence: f32) -> DetectionResult {
        DetectionResult::face(confidence, Region::new(0.3, 0.2, 0.2, 0.2))
    }

    fn text(confidence: f32, len: usize) -> DetectionResult {
        DetectionResult::text(confidence, len, Region::new(0.1, 0.8, 0.6, 0.1))
    }

    fn codes(reasons: &[FilterReason]) -> Vec<ReasonCode> {
        reasons.iter().map(|r| r.code).collect()
    }

    #[test]
    fn face_threshold_is_inclusive() {
        let t = Thresholds::default();
        assert!(face_flagged(&[face(0.45)], &t));
        assert!(!face_flagged(&[face(0.44)], &t));
    }

    #[test]
    fn text_needs_confidence_and_length() {
        let t = Thresholds::default();
        assert!(text_flagged(&[text(0.5, 2)], &t));
        assert!(!text_flagged(&[text(0.9, 1)], &t));
        assert!(!text_flagged(&[text(0.49, 10)], &t));
    }

    #[test]
    fn reasons_accumulate_across_kinds_and_cheap_checks() {
        let mut frames = vec![Vec::new(); 10];
        frames[3] = vec![face(0.9)];
        frames[5] = vec![text(0.8, 6)];
        let cheap = vec![FilterReason::new(ReasonCode::NotVertical, "1920x1080")];
        let (reasons, evidence) =
            decide(AggregatorConfig::default(), &FilterSet::all(), cheap, &frames);
        assert_eq!(
            codes(&reasons),
            vec![
                ReasonCode::NotVertical,
                ReasonCode::FaceDetected,
                ReasonCode::TextDetected
            ]
        );
        assert_eq!(evidence.face.flagged, 1);
        assert_eq!(evidence.text.flagged, 1);
    }

    #[test]
    fn strict_mode_short_circuits_within_kind_only() {
        let mut frames = vec![Vec::new(); 10];
        frames[0] = vec![face(0.9)];
        let (_, evidence) = decide(
            AggregatorConfig::default(),
            &FilterSet::all(),
            Vec::new(),
            &frames,
        );
        assert_eq!(evidence.face.evaluated, 1);
        assert_eq!(evidence.text.evaluated, 10);
        assert_eq!(evidence.frames_sampled, 10);
    }

    #[test]
    fn short_circuit_does_not_change_verdict() {
        let frames: Vec<Vec<DetectionResult>> = (0..8)
            .map(|i| if i % 2 == 0 { vec![face(0.7)] } else { Vec::new() })
            .collect();
        let strict = decide(
            AggregatorConfig::default(),
            &FilterSet::all(),
            Vec::new(),
            &frames,
        );
        // Same decision when every frame is evaluated.
        let mut aggregator = FrameVerdictAggregator::new(AggregatorConfig::default(), &FilterSet::all());
        for (i, frame) in frames.iter().enumerate() {
            aggregator.begin_frame();
            aggregator.observe(DetectionKind::Face, i as u32, frame);
        }
        let (full_reasons, _) = aggregator.finish(Vec::new());
        assert_eq!(codes(&strict.0), codes(&full_reasons));
    }

    #[test]
    fn fraction_policy_uses_counts() {
        let config = AggregatorConfig {
            face_policy: RejectionPolicy::Fraction(0.3),
            ..AggregatorConfig::default()
        };
        let mut frames = vec![Vec::new(); 10];
        frames[1] = vec![face(0.9)];
        frames[2] = vec![face(0.9)];
        let (reasons, evidence) = decide(config, &FilterSet::all(), Vec::new(), &frames);
        assert!(reasons.is_empty());
        assert_eq!(evidence.face, KindEvidence { flagged: 2, evaluated: 10 });

        frames[3] = vec![face(0.9)];
        frames[4] = vec![face(0.9)];
        let (reasons, _) = decide(config, &FilterSet::all(), Vec::new(), &frames);
        assert_eq!(codes(&reasons), vec![ReasonCode::FaceDetected]);
    }

    #[test]
    fn decision_is_deterministic() {
        let mut frames = vec![Vec::new(); 5];
        frames[2] = vec![face(0.5), text(0.6, 4)];
        let first = decide(AggregatorConfig::default(), &FilterSet::all(), Vec::new(), &frames);
        let second = decide(AggregatorConfig::default(), &FilterSet::all(), Vec::new(), &frames);
        assert_eq!(first, second);
    }

    #[test]
    fn failures_count_as_evaluated_unflagged() {
        let mut aggregator = FrameVerdictAggregator::new(AggregatorConfig::default(), &FilterSet::all());
        aggregator.begin_frame();
        aggregator.record_failure(DetectionKind::Face);
        aggregator.observe(DetectionKind::Text, 0, &[]);
        let (reasons, evidence) = aggregator.finish(Vec::new());
        assert!(reasons.is_empty());
        assert_eq!(evidence.detector_failures, 1);
        assert_eq!(evidence.face, KindEvidence { flagged: 0, evaluated: 1 });
    }

    #[test]
    fn inactive_kinds_are_never_wanted() {
        let filters: FilterSet = "vertical".parse().unwrap();
        let aggregator = FrameVerdictAggregator::new(AggregatorConfig::default(), &filters);
        assert!(!aggregator.wants(DetectionKind::Face));
        assert!(aggregator.is_saturated());
    }
}
