use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::backend::{Concurrency, DetectorBackend};
use crate::detect::result::{DetectionKind, DetectionResult};
use crate::error::DetectionError;
use crate::frame::FrameView;

type CallHook = Arc<dyn Fn(DetectionKind, u32) + Send + Sync>;

/// Deterministic backend keyed by sample index.
///
/// Drives the pipeline in tests without models or real video.
pub struct ScriptedBackend {
    name: &'static str,
    detections: HashMap<u32, Vec<DetectionResult>>,
    failing: HashSet<u32>,
    delay: Option<Duration>,
    concurrency: Concurrency,
    hook: Option<CallHook>,
    calls: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

impl ScriptedBackend {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            detections: HashMap::new(),
            failing: HashSet::new(),
            delay: None,
            concurrency: Concurrency::Shared,
            hook: None,
            calls: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            peak_in_flight: AtomicU64::new(0),
        }
    }

    /// Report `detection` when the frame with this sample index is analysed.
    pub fn at(mut self, sample_index: u32, detection: DetectionResult) -> Self {
        self.detections.entry(sample_index).or_default().push(detection);
        self
    }

    /// Fail with a backend error on this sample index.
    pub fn failing_at(mut self, sample_index: u32) -> Self {
        self.failing.insert(sample_index);
        self
    }

    /// Sleep inside every call (simulates slow inference).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn serialized(mut self) -> Self {
        self.concurrency = Concurrency::Serialized;
        self
    }

    /// Run `hook` at the start of every call.
    pub fn on_call<F>(mut self, hook: F) -> Self
    where
        F: Fn(DetectionKind, u32) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were ever running at the same time.
    pub fn peak_in_flight(&self) -> u64 {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicU64);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports(&self, _kind: DetectionKind) -> bool {
        true
    }

    fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    fn detect(
        &self,
        kind: DetectionKind,
        frame: &FrameView<'_>,
    ) -> Result<Vec<DetectionResult>, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let index = frame.index();
        if let Some(hook) = &self.hook {
            hook(kind, index);
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.contains(&index) {
            return Err(DetectionError::Backend(format!(
                "scripted failure at sample {}",
                index
            )));
        }
        Ok(self
            .detections
            .get(&index)
            .map(|list| list.iter().filter(|d| d.kind == kind).cloned().collect())
            .unwrap_or_default())
    }
}
