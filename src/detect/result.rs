use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability a detector provides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionKind {
    Face,
    Text,
}

impl DetectionKind {
    pub const ALL: [DetectionKind; 2] = [DetectionKind::Face, DetectionKind::Text];

    pub fn as_str(self) -> &'static str {
        match self {
            DetectionKind::Face => "face",
            DetectionKind::Text => "text",
        }
    }
}

impl fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounding box in normalized 0..1 coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Region {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn full_frame() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn intersection_area(&self, other: &Region) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    pub fn union_box(&self, other: &Region) -> Region {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (self.x + self.w).max(other.x + other.w);
        let y2 = (self.y + self.h).max(other.y + other.h);
        Region::new(x1, y1, x2 - x1, y2 - y1)
    }
}

/// One raw detection. Thresholding is left to the aggregator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub kind: DetectionKind,
    /// Raw score in [0, 1].
    pub confidence: f32,
    /// Recognized text length, text detections only.
    pub text_len: Option<usize>,
    pub region: Region,
}

impl DetectionResult {
    pub fn face(confidence: f32, region: Region) -> Self {
        Self {
            kind: DetectionKind::Face,
            confidence: confidence.clamp(0.0, 1.0),
            text_len: None,
            region,
        }
    }

    pub fn text(confidence: f32, text_len: usize, region: Region) -> Self {
        Self {
            kind: DetectionKind::Text,
            confidence: confidence.clamp(0.0, 1.0),
            text_len: Some(text_len),
            region,
        }
    }
}

/// Merge text detections whose overlap exceeds half of the smaller box.
///
/// The merged detection keeps the higher confidence and the longer text.
pub fn merge_overlapping_text(detections: Vec<DetectionResult>) -> Vec<DetectionResult> {
    let mut merged: Vec<DetectionResult> = Vec::with_capacity(detections.len());
    for detection in detections {
        if detection.kind != DetectionKind::Text {
            merged.push(detection);
            continue;
        }
        let existing = merged.iter_mut().find(|kept| {
            kept.kind == DetectionKind::Text && {
                let smaller = kept.region.area().min(detection.region.area());
                smaller > 0.0 && kept.region.intersection_area(&detection.region) > 0.5 * smaller
            }
        });
        match existing {
            Some(kept) => {
                kept.region = kept.region.union_box(&detection.region);
                kept.confidence = kept.confidence.max(detection.confidence);
                kept.text_len = match (kept.text_len, detection.text_len) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            }
            None => merged.push(detection),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_text_boxes_merge() {
        let detections = vec![
            DetectionResult::text(0.6, 3, Region::new(0.1, 0.1, 0.4, 0.1)),
            DetectionResult::text(0.8, 5, Region::new(0.15, 0.1, 0.4, 0.1)),
            DetectionResult::text(0.7, 2, Region::new(0.1, 0.8, 0.2, 0.1)),
        ];
        let merged = merge_overlapping_text(detections);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].confidence, 0.8);
        assert_eq!(merged[0].text_len, Some(5));
        assert!((merged[0].region.w - 0.45).abs() < 1e-6);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(DetectionResult::face(1.7, Region::full_frame()).confidence, 1.0);
    }
}
