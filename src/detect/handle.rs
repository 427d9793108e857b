use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::DetectionError;
use crate::frame::FrameView;

use super::backend::DetectorBackend;
use super::result::{merge_overlapping_text, DetectionKind, DetectionResult};

/// A backend bound to one detection kind.
///
/// Serialized backends are called through a single-slot gate. The handle counts
/// invocations so callers can verify that no detector work was spent.
pub struct DetectorHandle {
    kind: DetectionKind,
    backend: Arc<dyn DetectorBackend>,
    gate: Option<Arc<Mutex<()>>>,
    invocations: AtomicU64,
}

impl DetectorHandle {
    pub fn new(
        kind: DetectionKind,
        backend: Arc<dyn DetectorBackend>,
        gate: Option<Arc<Mutex<()>>>,
    ) -> Self {
        Self {
            kind,
            backend,
            gate,
            invocations: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> DetectionKind {
        self.kind
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_serialized(&self) -> bool {
        self.gate.is_some()
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Run the backend on one frame. Only detections of this handle's kind are kept.
    pub fn detect(&self, frame: &FrameView<'_>) -> Result<Vec<DetectionResult>, DetectionError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let raw = match &self.gate {
            Some(gate) => {
                let _slot = gate
                    .lock()
                    .map_err(|_| DetectionError::Backend("detector gate poisoned".into()))?;
                self.backend.detect(self.kind, frame)?
            }
            None => self.backend.detect(self.kind, frame)?,
        };
        let results: Vec<DetectionResult> =
            raw.into_iter().filter(|r| r.kind == self.kind).collect();
        Ok(match self.kind {
            DetectionKind::Text => merge_overlapping_text(results),
            DetectionKind::Face => results,
        })
    }
}

/// Detector handles for the active filter set. A `None` slot is never called.
#[derive(Clone, Default)]
pub struct Detectors {
    pub face: Option<Arc<DetectorHandle>>,
    pub text: Option<Arc<DetectorHandle>>,
}

impl Detectors {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: DetectionKind) -> Option<&Arc<DetectorHandle>> {
        match kind {
            DetectionKind::Face => self.face.as_ref(),
            DetectionKind::Text => self.text.as_ref(),
        }
    }

    /// Total detector calls across both kinds.
    pub fn invocations(&self) -> u64 {
        self.face.as_ref().map_or(0, |h| h.invocations())
            + self.text.as_ref().map_or(0, |h| h.invocations())
    }
}
