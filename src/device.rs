// Location: src/device.rs

//! Accelerator detection and device placement for the model.

use std::fmt;

use candle_core::{Device, DeviceLocation};

use crate::config::DevicePreference;
use crate::error::{Result, ServiceError};

/// Accelerators compiled in and visible at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accelerators {
    /// Whether CUDA support is compiled in and a device responds
    pub cuda: bool,
}

impl Accelerators {
    /// Detect available accelerators at runtime
    pub fn detect() -> Self {
        Self {
            cuda: candle_core::utils::cuda_is_available(),
        }
    }
}

impl fmt::Display for Accelerators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CUDA support: {}", if self.cuda { "yes" } else { "no" })
    }
}

/// Pick the device the model is placed on.
///
/// `Auto` falls back to the CPU when no accelerator is present. An explicit
/// CUDA request that cannot be honoured is a startup failure.
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    let accelerators = Accelerators::detect();
    tracing::info!(%accelerators, ?preference, "selecting device");

    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Auto if accelerators.cuda => Device::new_cuda(0)
            .map_err(|e| ServiceError::startup("failed to initialise CUDA device 0", e))?,
        DevicePreference::Auto => Device::Cpu,
        DevicePreference::Cuda(ordinal) => {
            if !accelerators.cuda {
                return Err(ServiceError::Startup {
                    message: format!("CUDA device {} requested but CUDA is unavailable", ordinal),
                    source: None,
                });
            }
            Device::new_cuda(ordinal).map_err(|e| {
                ServiceError::startup(format!("failed to initialise CUDA device {}", ordinal), e)
            })?
        }
    };

    tracing::info!(device = %describe(&device), "model device selected");
    Ok(device)
}

/// Short device label such as `cpu` or `cuda:0`
pub fn describe(device: &Device) -> String {
    match device.location() {
        DeviceLocation::Cpu => "cpu".to_string(),
        DeviceLocation::Cuda { gpu_id } => format!("cuda:{}", gpu_id),
        DeviceLocation::Metal { gpu_id } => format!("metal:{}", gpu_id),
    }
}
