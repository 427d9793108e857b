//! Compute device selection.
//!
//! The device is resolved once at run start and passed into backend construction.
//! Nothing reads it from ambient state afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::{Command, Stdio};

use crate::tools::Tool;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Gpu,
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cpu => f.write_str("cpu"),
            ComputeDevice::Gpu => f.write_str("gpu"),
        }
    }
}

/// What the host offers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub gpu_available: bool,
    pub gpu_name: Option<String>,
}

impl DeviceCapabilities {
    pub fn cpu_only() -> Self {
        Self::default()
    }

    /// Probe for a CUDA device via `nvidia-smi -L`.
    pub fn detect() -> Self {
        let output = Command::new(Tool::NvidiaSmi.program())
            .arg("-L")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();
        match output {
            Ok(output) if output.status.success() => {
                let listing = String::from_utf8_lossy(&output.stdout);
                let first = listing.lines().find(|line| line.starts_with("GPU"));
                Self {
                    gpu_available: first.is_some(),
                    gpu_name: first.map(|line| line.trim().to_string()),
                }
            }
            _ => Self::cpu_only(),
        }
    }
}

/// GPU when requested and present, otherwise CPU.
pub fn select_device(gpu_enabled: bool, capabilities: &DeviceCapabilities) -> ComputeDevice {
    if !gpu_enabled {
        return ComputeDevice::Cpu;
    }
    if capabilities.gpu_available {
        log::info!(
            "using GPU: {}",
            capabilities.gpu_name.as_deref().unwrap_or("unknown device")
        );
        ComputeDevice::Gpu
    } else {
        log::warn!("GPU requested but none available; falling back to CPU");
        ComputeDevice::Cpu
    }
}
