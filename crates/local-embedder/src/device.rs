use std::fmt::Display;

use candle_core::Device;
use candle_core::utils::{cuda_is_available, metal_is_available};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Compute device the encoder runs on.
///
/// `Cuda` is the general-purpose accelerator, `Metal` the vendor-specific one,
/// and `Cpu` the fallback every build supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cuda,
    Metal,
    Cpu,
}

impl DeviceKind {
    /// Probe the runtime once and pick the preferred device.
    pub fn probe() -> Self {
        Self::prefer(cuda_is_available(), metal_is_available())
    }

    /// Preference order given the capabilities that are present.
    pub fn prefer(cuda: bool, metal: bool) -> Self {
        if cuda {
            DeviceKind::Cuda
        } else if metal {
            DeviceKind::Metal
        } else {
            DeviceKind::Cpu
        }
    }

    /// Open the device. Ordinal 0 is used for accelerators.
    pub fn open(&self) -> Result<Device> {
        Ok(match self {
            DeviceKind::Cuda => Device::new_cuda(0)?,
            DeviceKind::Metal => Device::new_metal(0)?,
            DeviceKind::Cpu => Device::Cpu,
        })
    }
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceKind::Cuda => "cuda",
            DeviceKind::Metal => "metal",
            DeviceKind::Cpu => "cpu",
        };
        write!(f, "{}", s)
    }
}
