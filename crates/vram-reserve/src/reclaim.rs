use crate::telemetry::TelemetryProvider;
use crate::types::ReclaimReport;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Hooks into the tensor runtime that owns the device allocator.
///
/// Every call is best-effort. Implementations report failure through their return value;
/// a panic is contained by the [`Reclaimer`] and treated as failure of that step only.
pub trait CacheRuntime: Send + Sync {
    /// Return cached-but-unused allocator blocks on `device_index` to the device.
    fn release_allocator_cache(&self, device_index: u32) -> bool;

    /// Run a generic collection pass; returns the number of objects reclaimed.
    fn run_generic_gc(&self) -> u64;

    /// Drop model weights retained by a higher-level model cache. Only invoked by the
    /// aggressive reclaim path.
    fn release_model_cache(&self) -> bool;
}

/// Runtime for processes that host no tensor runtime: nothing to release.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRuntime;

impl CacheRuntime for NoopRuntime {
    fn release_allocator_cache(&self, _device_index: u32) -> bool {
        false
    }

    fn run_generic_gc(&self) -> u64 {
        0
    }

    fn release_model_cache(&self) -> bool {
        false
    }
}

/// Releases cached device memory and measures the effect.
///
/// Reclaims on the same device are serialized so one caller's before/after window never
/// overlaps another's. Reclaims on different devices run concurrently.
pub struct Reclaimer {
    telemetry: Arc<TelemetryProvider>,
    runtime: Arc<dyn CacheRuntime>,
    device_locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
}

/// Aggregate of a reclaim pass over several devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReclaimReport {
    pub aggressive: bool,
    pub devices: Vec<ReclaimReport>,
    pub total_freed_gb: f64,
}

impl Reclaimer {
    pub fn new(telemetry: Arc<TelemetryProvider>, runtime: Arc<dyn CacheRuntime>) -> Self {
        Self {
            telemetry,
            runtime,
            device_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn telemetry(&self) -> &TelemetryProvider {
        &self.telemetry
    }

    /// Release the allocator cache on `device_index` and run a collection pass.
    pub fn reclaim(&self, device_index: u32) -> ReclaimReport {
        self.run(device_index, false)
    }

    /// Like [`Reclaimer::reclaim`], but also asks the model cache to drop retained weights.
    ///
    /// Unloaded models must be reloaded before their next use; callers opt into this
    /// explicitly.
    pub fn reclaim_aggressive(&self, device_index: u32) -> ReclaimReport {
        self.run(device_index, true)
    }

    /// Reclaim every enumerated device.
    pub fn reclaim_all(&self, aggressive: bool) -> BatchReclaimReport {
        self.reclaim_batch(0..self.telemetry.device_count(), aggressive)
    }

    pub fn reclaim_batch(
        &self,
        devices: impl IntoIterator<Item = u32>,
        aggressive: bool,
    ) -> BatchReclaimReport {
        let devices: Vec<ReclaimReport> = devices
            .into_iter()
            .map(|device| self.run(device, aggressive))
            .collect();
        let total_freed_gb = devices
            .iter()
            .fold(0.0, |total, report| total + report.freed_gb);

        tracing::info!(
            target: "vram.reclaim",
            devices = devices.len(),
            aggressive,
            total_freed_gb,
            "batch reclaim finished"
        );

        BatchReclaimReport {
            aggressive,
            devices,
            total_freed_gb,
        }
    }

    fn device_lock(&self, device_index: u32) -> Arc<Mutex<()>> {
        self.device_locks
            .lock()
            .entry(device_index)
            .or_default()
            .clone()
    }

    fn run(&self, device_index: u32, aggressive: bool) -> ReclaimReport {
        // Without enumeration the runtime may still own devices, so only a known
        // device count can rule an index out.
        if self.telemetry.is_available() && !self.telemetry.validate_index(device_index) {
            tracing::warn!(
                target: "vram.reclaim",
                device = device_index,
                "skipping reclaim on a device that does not exist"
            );
            return ReclaimReport::skipped(device_index);
        }

        let lock = self.device_lock(device_index);
        let _window = lock.lock();

        let before = self.telemetry.snapshot(device_index);

        let allocator_released = step("release allocator cache", device_index, || {
            self.runtime.release_allocator_cache(device_index)
        })
        .unwrap_or(false);

        let model_cache_released = aggressive.then(|| {
            step("release model cache", device_index, || {
                self.runtime.release_model_cache()
            })
            .unwrap_or(false)
        });

        let after = self.telemetry.snapshot(device_index);

        let gc_collected =
            step("generic gc", device_index, || self.runtime.run_generic_gc()).unwrap_or(0);

        // Concurrent allocations can make this negative; report it as measured.
        let freed_gb = match (before, after) {
            (Some(before), Some(after)) => before.used_gb - after.used_gb,
            _ => 0.0,
        };

        if before.is_some() && after.is_some() {
            if freed_gb > 0.0 {
                tracing::info!(
                    target: "vram.reclaim",
                    device = device_index,
                    freed_gb,
                    freed_mb = freed_gb * 1024.0,
                    "reclaimed device memory"
                );
            } else {
                tracing::info!(
                    target: "vram.reclaim",
                    device = device_index,
                    freed_gb,
                    "reclaim finished; no additional memory released"
                );
            }
        } else {
            tracing::info!(
                target: "vram.reclaim",
                device = device_index,
                "reclaim finished; effect not measurable without telemetry"
            );
        }

        ReclaimReport {
            device_index,
            attempted: true,
            freed_gb,
            before,
            after,
            allocator_released,
            gc_collected,
            model_cache_released,
        }
    }
}

impl std::fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reclaimer")
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

fn step<T>(what: &'static str, device_index: u32, f: impl FnOnce() -> T) -> Option<T> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!(
                target: "vram.reclaim",
                device = device_index,
                step = what,
                "reclaim step panicked; continuing with remaining steps"
            );
            None
        }
    }
}
