//! Face and text capability providers.
//!
//! Backends are selected once at startup from the registry and bound to a kind through
//! a [`DetectorHandle`]. Call sites never branch on the concrete backend.

mod backend;
pub mod backends;
mod device;
mod handle;
mod registry;
mod result;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::FilterSet;

pub use backend::{Concurrency, DetectorBackend};
pub use backends::{HeuristicFaceBackend, HeuristicTextBackend, ScriptedBackend, StubBackend};
pub use device::{select_device, ComputeDevice, DeviceCapabilities};
pub use handle::{DetectorHandle, Detectors};
pub use registry::BackendRegistry;
pub use result::{merge_overlapping_text, DetectionKind, DetectionResult, Region};

pub const DEFAULT_FACE_BACKEND: &str = "heuristic-face";
pub const DEFAULT_TEXT_BACKEND: &str = "heuristic-text";

/// Which backend serves each kind, plus optional model files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    pub face_backend: String,
    pub text_backend: String,
    pub face_model: Option<PathBuf>,
    pub text_model: Option<PathBuf>,
    /// Model input size (width, height) for ONNX backends.
    pub model_input: (u32, u32),
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            face_backend: DEFAULT_FACE_BACKEND.to_string(),
            text_backend: DEFAULT_TEXT_BACKEND.to_string(),
            face_model: None,
            text_model: None,
            model_input: (320, 320),
        }
    }
}

/// Register every backend available for the selected device.
pub fn build_registry(settings: &DetectorSettings, device: ComputeDevice) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(HeuristicFaceBackend::new());
    registry.register(HeuristicTextBackend::new());
    registry.register(StubBackend::new());

    #[cfg(feature = "backend-tract")]
    {
        let (width, height) = settings.model_input;
        if let Some(path) = &settings.face_model {
            registry.register(backends::TractBackend::new(
                path,
                DetectionKind::Face,
                width,
                height,
                device,
            )?);
        }
        if let Some(path) = &settings.text_model {
            registry.register(backends::TractBackend::new(
                path,
                DetectionKind::Text,
                width,
                height,
                device,
            )?);
        }
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        if settings.face_model.is_some() || settings.text_model.is_some() {
            return Err(anyhow!(
                "model paths require the backend-tract feature (device {})",
                device
            ));
        }
    }

    Ok(registry)
}

/// Bind handles for the active filters and warm their backends up.
pub fn bind_detectors(
    registry: &BackendRegistry,
    settings: &DetectorSettings,
    filters: &FilterSet,
) -> Result<Detectors> {
    let mut detectors = Detectors::none();
    if filters.faces {
        detectors.face = Some(Arc::new(bind(registry, &settings.face_backend, DetectionKind::Face)?));
    }
    if filters.text {
        detectors.text = Some(Arc::new(bind(registry, &settings.text_backend, DetectionKind::Text)?));
    }
    Ok(detectors)
}

fn bind(registry: &BackendRegistry, name: &str, kind: DetectionKind) -> Result<DetectorHandle> {
    let backend = registry
        .get(name)
        .ok_or_else(|| anyhow!("{} backend '{}' not available (have: {})", kind, name, registry.list().join(", ")))?;
    backend.warm_up()?;
    let handle = registry.handle(name, kind)?;
    log::info!(
        "{} detection: backend={} serialized={}",
        kind,
        handle.backend_name(),
        handle.is_serialized()
    );
    Ok(handle)
}
