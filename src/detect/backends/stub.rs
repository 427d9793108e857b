use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectionKind, DetectionResult};
use crate::error::DetectionError;
use crate::frame::FrameView;

/// Stub backend. Validates the frame and reports nothing.
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, _kind: DetectionKind) -> bool {
        true
    }

    fn detect(
        &self,
        _kind: DetectionKind,
        frame: &FrameView<'_>,
    ) -> Result<Vec<DetectionResult>, DetectionError> {
        frame.rgb24()?;
        Ok(Vec::new())
    }
}
