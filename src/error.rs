//! Per-video failure taxonomy and filter reasons.
//!
//! Every per-video error is converted into a [`FilterReason`] at the pipeline boundary.
//! Nothing in this module ever aborts a batch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Reason code attached to a rejected video.
///
/// Declaration order is the reporting order: orientation, duration, faces, text, then
/// terminal failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    NotVertical,
    InvalidMetadata,
    DurationOutOfRange,
    FaceDetected,
    TextDetected,
    DownloadFailed,
    UnreadableFile,
    Timeout,
    Cancelled,
    InternalError,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::NotVertical => "NOT_VERTICAL",
            ReasonCode::InvalidMetadata => "INVALID_METADATA",
            ReasonCode::DurationOutOfRange => "DURATION_OUT_OF_RANGE",
            ReasonCode::FaceDetected => "FACE_DETECTED",
            ReasonCode::TextDetected => "TEXT_DETECTED",
            ReasonCode::DownloadFailed => "DOWNLOAD_FAILED",
            ReasonCode::UnreadableFile => "UNREADABLE_FILE",
            ReasonCode::Timeout => "TIMEOUT",
            ReasonCode::Cancelled => "CANCELLED",
            ReasonCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged reason plus free-text detail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterReason {
    pub code: ReasonCode,
    pub detail: String,
}

impl FilterReason {
    pub fn new(code: ReasonCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

/// Sort reasons into reporting order. Stable, so equal codes keep insertion order.
pub fn order_reasons(reasons: &mut [FilterReason]) {
    reasons.sort_by_key(|reason| reason.code);
}

/// Terminal per-video failure.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("unreadable video: {0}")]
    UnreadableVideo(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EvalError {
    pub fn code(&self) -> ReasonCode {
        match self {
            EvalError::Download(_) => ReasonCode::DownloadFailed,
            EvalError::UnreadableVideo(_) => ReasonCode::UnreadableFile,
            EvalError::InvalidMetadata(_) => ReasonCode::InvalidMetadata,
            EvalError::Timeout(_) => ReasonCode::Timeout,
            EvalError::Cancelled => ReasonCode::Cancelled,
            EvalError::Internal(_) => ReasonCode::InternalError,
        }
    }

    pub fn reason(&self) -> FilterReason {
        FilterReason::new(self.code(), self.to_string())
    }
}

/// Per-frame detector failure. Fail-open: never escalates past the frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectionError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("detector backend failed: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_sort_in_reporting_order() {
        let mut reasons = vec![
            FilterReason::new(ReasonCode::TextDetected, "t"),
            FilterReason::new(ReasonCode::FaceDetected, "f"),
            FilterReason::new(ReasonCode::DurationOutOfRange, "d"),
            FilterReason::new(ReasonCode::NotVertical, "o"),
        ];
        order_reasons(&mut reasons);
        let codes: Vec<ReasonCode> = reasons.iter().map(|r| r.code).collect();
        assert_eq!(
            codes,
            vec![
                ReasonCode::NotVertical,
                ReasonCode::DurationOutOfRange,
                ReasonCode::FaceDetected,
                ReasonCode::TextDetected,
            ]
        );
    }

    #[test]
    fn eval_errors_map_to_codes() {
        assert_eq!(
            EvalError::Download("403".into()).code(),
            ReasonCode::DownloadFailed
        );
        assert_eq!(
            EvalError::Timeout(Duration::from_secs(5)).reason().code,
            ReasonCode::Timeout
        );
        assert_eq!(
            serde_json::to_string(&ReasonCode::DurationOutOfRange).unwrap(),
            "\"DURATION_OUT_OF_RANGE\""
        );
    }
}
