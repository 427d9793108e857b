use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::{Concurrency, DetectorBackend};
use super::handle::DetectorHandle;
use super::result::DetectionKind;

struct Registered {
    backend: Arc<dyn DetectorBackend>,
    /// One gate per backend, shared by every handle that calls it.
    gate: Arc<Mutex<()>>,
}

/// Registry of detector backends.
///
/// Backends are shared behind `Arc`; the registry hands out [`DetectorHandle`]s that
/// apply the backend's concurrency contract.
pub struct BackendRegistry {
    backends: HashMap<String, Registered>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        self.register_shared(Arc::new(backend));
    }

    /// Register an already shared backend (tests keep a clone to inspect it).
    pub fn register_shared(&mut self, backend: Arc<dyn DetectorBackend>) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(
            name,
            Registered {
                backend,
                gate: Arc::new(Mutex::new(())),
            },
        );
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn DetectorBackend>> {
        self.backends.get(name).map(|entry| entry.backend.clone())
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<Arc<dyn DetectorBackend>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Name of a backend that supports `kind`, preferring the default.
    pub fn backend_for_kind(&self, kind: DetectionKind) -> Result<String> {
        if let Some(name) = &self.default_name {
            if let Some(entry) = self.backends.get(name) {
                if entry.backend.supports(kind) {
                    return Ok(name.clone());
                }
            }
        }
        let mut names = self.list();
        names.retain(|name| {
            self.backends
                .get(name)
                .is_some_and(|entry| entry.backend.supports(kind))
        });
        names
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no registered backend supports {} detection", kind))
    }

    /// Build a handle for `kind` from the named backend.
    pub fn handle(&self, name: &str, kind: DetectionKind) -> Result<DetectorHandle> {
        let entry = self
            .backends
            .get(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        if !entry.backend.supports(kind) {
            return Err(anyhow!(
                "backend '{}' does not support {} detection",
                name,
                kind
            ));
        }
        let gate = match entry.backend.concurrency() {
            Concurrency::Shared => None,
            Concurrency::Serialized => Some(entry.gate.clone()),
        };
        Ok(DetectorHandle::new(kind, entry.backend.clone(), gate))
    }

    /// Build a handle for `kind` from whichever backend supports it.
    pub fn handle_for_kind(&self, kind: DetectionKind) -> Result<DetectorHandle> {
        let name = self.backend_for_kind(kind)?;
        self.handle(&name, kind)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
