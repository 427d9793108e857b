#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{Concurrency, DetectorBackend};
use crate::detect::device::ComputeDevice;
use crate::detect::result::{DetectionKind, DetectionResult, Region};
use crate::error::DetectionError;
use crate::frame::FrameView;

/// Tract-based backend for ONNX face or text models.
///
/// Frames are resized (nearest neighbour) to the model input. The model is expected to
/// output rows of `[x, y, w, h, score]` (faces) or `[x, y, w, h, score, length]` (text),
/// in normalized coordinates. A model whose last dimension is shorter is treated as a
/// whole-frame classifier and its maximum score reported.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    kind: DetectionKind,
    width: u32,
    height: u32,
    device: ComputeDevice,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        kind: DetectionKind,
        width: u32,
        height: u32,
        device: ComputeDevice,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        if device == ComputeDevice::Gpu {
            log::info!("tract executes on CPU threads; GPU selection serializes its calls");
        }

        Ok(Self {
            model,
            kind,
            width,
            height,
            device,
        })
    }

    fn build_input(&self, frame: &FrameView<'_>) -> Result<Tensor, DetectionError> {
        let pixels = frame.rgb24()?;
        let src_w = frame.width() as usize;
        let src_h = frame.height() as usize;
        let dst_w = self.width as usize;
        let dst_h = self.height as usize;

        let input = tract_ndarray::Array4::from_shape_fn((1, 3, dst_h, dst_w), |(_, channel, y, x)| {
            let sx = (x * src_w / dst_w).min(src_w - 1);
            let sy = (y * src_h / dst_h).min(src_h - 1);
            pixels[(sy * src_w + sx) * 3 + channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn extract(&self, outputs: TVec<TValue>) -> Result<Vec<DetectionResult>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let row_len = scores.shape().last().copied().unwrap_or(0);
        let values: Vec<f32> = scores.iter().copied().collect();

        if row_len < 5 {
            let max_score = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            if !max_score.is_finite() {
                return Ok(Vec::new());
            }
            return Ok(vec![self.result(max_score, None, Region::full_frame())]);
        }

        Ok(values
            .chunks_exact(row_len)
            .filter(|row| row[4].is_finite() && row[4] > 0.0)
            .map(|row| {
                let len = row.get(5).map(|v| v.max(0.0).round() as usize);
                self.result(row[4], len, Region::new(row[0], row[1], row[2], row[3]))
            })
            .collect())
    }

    fn result(&self, score: f32, len: Option<usize>, region: Region) -> DetectionResult {
        match self.kind {
            DetectionKind::Face => DetectionResult::face(score, region),
            DetectionKind::Text => DetectionResult::text(score, len.unwrap_or(0), region),
        }
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        match self.kind {
            DetectionKind::Face => "tract-face",
            DetectionKind::Text => "tract-text",
        }
    }

    fn supports(&self, kind: DetectionKind) -> bool {
        kind == self.kind
    }

    fn concurrency(&self) -> Concurrency {
        match self.device {
            ComputeDevice::Gpu => Concurrency::Serialized,
            ComputeDevice::Cpu => Concurrency::Shared,
        }
    }

    fn detect(
        &self,
        _kind: DetectionKind,
        frame: &FrameView<'_>,
    ) -> Result<Vec<DetectionResult>, DetectionError> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| DetectionError::Backend(format!("ONNX inference failed: {e}")))?;
        self.extract(outputs)
            .map_err(|e| DetectionError::Backend(e.to_string()))
    }
}
