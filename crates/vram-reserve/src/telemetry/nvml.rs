//! NVIDIA telemetry through the NVML library.

use super::{TelemetryBackend, TelemetryError};
use crate::types::MemorySnapshot;
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::{Device, Nvml};
use parking_lot::RwLock;

/// NVML handle, initialized once and released on [`TelemetryBackend::shutdown`].
pub struct NvmlBackend {
    nvml: RwLock<Option<Nvml>>,
}

impl NvmlBackend {
    pub fn init() -> Result<Self, TelemetryError> {
        let nvml = Nvml::init().map_err(|err| match err {
            NvmlError::DriverNotLoaded | NvmlError::LibraryNotFound => {
                TelemetryError::Nvml("library or driver not available".to_owned())
            }
            other => TelemetryError::Nvml(format!("init failed: {other}")),
        })?;
        Ok(Self {
            nvml: RwLock::new(Some(nvml)),
        })
    }

    fn with_device<T>(
        &self,
        index: u32,
        what: &'static str,
        query: impl FnOnce(&Device<'_>) -> Result<T, NvmlError>,
    ) -> Option<T> {
        let guard = self.nvml.read();
        let nvml = guard.as_ref()?;
        let outcome = nvml
            .device_by_index(index)
            .and_then(|device| query(&device));
        match outcome {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(
                    target: "vram.telemetry",
                    index,
                    query = what,
                    error = %err,
                    "NVML query failed"
                );
                None
            }
        }
    }
}

impl TelemetryBackend for NvmlBackend {
    fn name(&self) -> &'static str {
        "nvml"
    }

    fn device_count(&self) -> u32 {
        let guard = self.nvml.read();
        let Some(nvml) = guard.as_ref() else {
            return 0;
        };
        nvml.device_count().unwrap_or_else(|err| {
            tracing::error!(target: "vram.telemetry", error = %err, "NVML device count failed");
            0
        })
    }

    fn memory_snapshot(&self, index: u32) -> Option<MemorySnapshot> {
        self.with_device(index, "memory", |device| device.memory_info())
            .map(|info| MemorySnapshot::from_bytes(info.total, info.used, info.free))
    }

    fn device_name(&self, index: u32) -> Option<String> {
        self.with_device(index, "name", |device| device.name())
    }

    fn temperature(&self, index: u32) -> Option<u32> {
        self.with_device(index, "temperature", |device| {
            device.temperature(TemperatureSensor::Gpu)
        })
    }

    fn utilization(&self, index: u32) -> Option<u32> {
        self.with_device(index, "utilization", |device| device.utilization_rates())
            .map(|rates| rates.gpu)
    }

    fn shutdown(&self) {
        let Some(nvml) = self.nvml.write().take() else {
            return;
        };
        if let Err(err) = nvml.shutdown() {
            tracing::error!(target: "vram.telemetry", error = %err, "NVML shutdown failed");
        }
    }
}
