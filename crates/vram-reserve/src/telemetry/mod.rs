//! Device memory telemetry.
//!
//! A [`TelemetryProvider`] is constructed once (usually at process startup), owns exactly
//! one [`TelemetryBackend`], and is passed by reference to whoever needs device data.
//! Nothing here returns an error: an out-of-range index, a missing monitoring library or
//! a failing driver query all surface as `None`.

mod fixed;
#[cfg(feature = "nvml")]
mod nvml;
mod sysfs;

pub use fixed::{FixedBackend, FixedDevice};
#[cfg(feature = "nvml")]
pub use nvml::NvmlBackend;
pub use sysfs::SysfsBackend;

use crate::types::{DeviceInfo, MemorySnapshot};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Failure inside a telemetry backend. Backends log these and report `None` upward.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected value in {path}: {value:?}")]
    Parse { path: String, value: String },
    #[error("nvml: {0}")]
    Nvml(String),
}

/// Low-level device queries, one implementation per monitoring library.
///
/// Implementations should be cheap to call and must not hold locks across calls; the
/// provider performs index validation and panic isolation on top.
pub trait TelemetryBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn device_count(&self) -> u32;

    fn memory_snapshot(&self, index: u32) -> Option<MemorySnapshot>;

    fn device_name(&self, _index: u32) -> Option<String> {
        None
    }

    /// Core temperature in degrees Celsius.
    fn temperature(&self, _index: u32) -> Option<u32> {
        None
    }

    /// Compute utilization in percent.
    fn utilization(&self, _index: u32) -> Option<u32> {
        None
    }

    /// Release library handles. Called at most once by [`TelemetryProvider`].
    fn shutdown(&self) {}
}

impl<T: TelemetryBackend + ?Sized> TelemetryBackend for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn device_count(&self) -> u32 {
        (**self).device_count()
    }

    fn memory_snapshot(&self, index: u32) -> Option<MemorySnapshot> {
        (**self).memory_snapshot(index)
    }

    fn device_name(&self, index: u32) -> Option<String> {
        (**self).device_name(index)
    }

    fn temperature(&self, index: u32) -> Option<u32> {
        (**self).temperature(index)
    }

    fn utilization(&self, index: u32) -> Option<u32> {
        (**self).utilization(index)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}

/// Backend used when no monitoring capability exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

impl TelemetryBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn device_count(&self) -> u32 {
        0
    }

    fn memory_snapshot(&self, _index: u32) -> Option<MemorySnapshot> {
        None
    }
}

/// Which backend [`TelemetryProvider::detect`] should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    /// NVML when compiled in and loadable, then sysfs, then nothing.
    #[default]
    Auto,
    Nvml,
    Sysfs,
    None,
}

/// Owner of the process' telemetry backend.
pub struct TelemetryProvider {
    backend: Box<dyn TelemetryBackend>,
    shut_down: AtomicBool,
}

impl TelemetryProvider {
    pub fn new(backend: impl TelemetryBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn unavailable() -> Self {
        Self::new(UnavailableBackend)
    }

    /// Initialize the backend selected by `kind`.
    ///
    /// Initialization failures are logged and degrade to the next candidate (for
    /// [`TelemetryKind::Auto`]) or to an unavailable provider.
    pub fn detect(kind: TelemetryKind) -> Self {
        let provider = match kind {
            TelemetryKind::None => Self::unavailable(),
            TelemetryKind::Nvml => Self::nvml().unwrap_or_else(Self::unavailable),
            TelemetryKind::Sysfs => Self::new(SysfsBackend::discover()),
            TelemetryKind::Auto => Self::nvml().unwrap_or_else(|| {
                let sysfs = SysfsBackend::discover();
                if sysfs.device_count() > 0 {
                    Self::new(sysfs)
                } else {
                    Self::unavailable()
                }
            }),
        };

        tracing::info!(
            target: "vram.telemetry",
            backend = provider.backend_name(),
            devices = provider.device_count(),
            "device telemetry initialized"
        );
        provider
    }

    #[cfg(feature = "nvml")]
    fn nvml() -> Option<Self> {
        match NvmlBackend::init() {
            Ok(backend) => Some(Self::new(backend)),
            Err(err) => {
                tracing::warn!(
                    target: "vram.telemetry",
                    error = %err,
                    "NVML unavailable; device monitoring disabled for this backend"
                );
                None
            }
        }
    }

    #[cfg(not(feature = "nvml"))]
    fn nvml() -> Option<Self> {
        tracing::debug!(
            target: "vram.telemetry",
            "built without the `nvml` feature; skipping NVML backend"
        );
        None
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_available(&self) -> bool {
        self.device_count() > 0
    }

    pub fn device_count(&self) -> u32 {
        self.guarded("device count", || Some(self.backend.device_count()))
            .unwrap_or(0)
    }

    /// Whether `index` names an enumerated device. Logs a warning when it does not.
    pub fn validate_index(&self, index: u32) -> bool {
        let count = self.device_count();
        if index >= count {
            tracing::warn!(
                target: "vram.telemetry",
                index,
                count,
                "device index out of range"
            );
            return false;
        }
        true
    }

    /// Fresh memory snapshot for `index`; never cached.
    ///
    /// Returns `None` for an out-of-range index, a missing monitoring capability, a failed
    /// query, or a reading that cannot drive a decision (non-finite, negative, zero total).
    pub fn snapshot(&self, index: u32) -> Option<MemorySnapshot> {
        if !self.validate_index(index) {
            return None;
        }

        let snapshot = self.guarded("memory snapshot", || self.backend.memory_snapshot(index))?;
        if !snapshot.is_usable() {
            tracing::warn!(
                target: "vram.telemetry",
                index,
                total_gb = snapshot.total_gb,
                used_gb = snapshot.used_gb,
                free_gb = snapshot.free_gb,
                "discarding unusable memory snapshot"
            );
            return None;
        }
        Some(snapshot)
    }

    pub fn device_name(&self, index: u32) -> Option<String> {
        self.in_range(index)?;
        self.guarded("device name", || self.backend.device_name(index))
    }

    pub fn temperature(&self, index: u32) -> Option<u32> {
        self.in_range(index)?;
        self.guarded("temperature", || self.backend.temperature(index))
    }

    pub fn utilization(&self, index: u32) -> Option<u32> {
        self.in_range(index)?;
        self.guarded("utilization", || self.backend.utilization(index))
    }

    /// Everything known about a device; each field is queried independently.
    pub fn device_info(&self, index: u32) -> DeviceInfo {
        if !self.validate_index(index) {
            return DeviceInfo::unavailable(index);
        }

        DeviceInfo {
            index,
            available: true,
            name: self.device_name(index),
            memory: self.snapshot(index),
            temperature_c: self.temperature(index),
            utilization_percent: self.utilization(index),
        }
    }

    /// Release the backend. Safe to call more than once; later queries return `None`.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let backend = &self.backend;
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| backend.shutdown()));
        if outcome.is_err() {
            tracing::error!(
                target: "vram.telemetry",
                backend = backend.name(),
                "telemetry backend panicked during shutdown"
            );
        } else {
            tracing::info!(
                target: "vram.telemetry",
                backend = backend.name(),
                "device telemetry shut down"
            );
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn in_range(&self, index: u32) -> Option<()> {
        (index < self.device_count()).then_some(())
    }

    fn guarded<T>(&self, what: &'static str, query: impl FnOnce() -> Option<T>) -> Option<T> {
        if self.is_shut_down() {
            return None;
        }
        match std::panic::catch_unwind(AssertUnwindSafe(query)) {
            Ok(value) => value,
            Err(_) => {
                tracing::error!(
                    target: "vram.telemetry",
                    backend = self.backend.name(),
                    query = what,
                    "telemetry backend panicked"
                );
                None
            }
        }
    }
}

impl Drop for TelemetryProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TelemetryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryProvider")
            .field("backend", &self.backend.name())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
