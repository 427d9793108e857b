use anyhow::Result;

use crate::error::DetectionError;
use crate::frame::FrameView;

use super::result::{DetectionKind, DetectionResult};

/// Whether a backend may be called from several workers at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Concurrency {
    /// Safe for concurrent `detect` calls.
    Shared,
    /// Calls are funnelled through a single-slot gate.
    Serialized,
}

/// Detector backend trait.
///
/// # Audit Boundary
///
/// Implementations receive a borrowed [`FrameView`] and MUST NOT:
/// - Keep pixels beyond the `detect` call
/// - Write frames to disk
/// - Apply decision thresholds (report raw scores; the aggregator decides)
///
/// A backend may serve more than one [`DetectionKind`]; `detect` is only called with
/// kinds for which `supports` returned true.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a detection kind.
    fn supports(&self, kind: DetectionKind) -> bool;

    /// Concurrency contract. Backends that hold non-reentrant state return `Serialized`.
    fn concurrency(&self) -> Concurrency {
        Concurrency::Shared
    }

    /// Run detection on one frame.
    fn detect(
        &self,
        kind: DetectionKind,
        frame: &FrameView<'_>,
    ) -> Result<Vec<DetectionResult>, DetectionError>;

    /// Optional warm-up hook, called once before the batch starts.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
