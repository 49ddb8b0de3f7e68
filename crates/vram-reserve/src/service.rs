use crate::reclaim::{CacheRuntime, Reclaimer};
use crate::report::summarize_device_info;
use crate::slot::ReservationSlot;
use crate::strategy::{checked_decide, safe_default_bytes};
use crate::telemetry::TelemetryProvider;
use crate::types::{DeviceInfo, ReclaimReport, ReservationRequest, ReservationResult};
use crate::units::bytes_to_gb;
use crate::DEFAULT_TARGET_GB;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// One invocation of [`ReservationService::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOptions {
    pub request: ReservationRequest,
    /// Release cached allocator memory before measuring.
    pub reclaim_before: bool,
    /// Query and log name/memory/temperature/utilization for the device.
    pub collect_device_info: bool,
}

impl ApplyOptions {
    pub fn new(request: ReservationRequest) -> Self {
        Self {
            request,
            reclaim_before: false,
            collect_device_info: false,
        }
    }
}

/// What [`ReservationService::apply`] did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationOutcome {
    /// Device actually measured (out-of-range requests are redirected to device 0).
    pub device_index: u32,
    pub requested_device_index: u32,
    pub result: ReservationResult,
    /// Sizing failed and the safe default was stored instead.
    pub fell_back: bool,
    pub reclaim: Option<ReclaimReport>,
    pub device_info: Option<DeviceInfo>,
}

impl ReservationOutcome {
    pub fn bytes(&self) -> u64 {
        self.result.bytes
    }
}

/// Sizes the reservation for a device and writes it to the allocator slot.
///
/// The slot is always written: if sizing fails for any reason the safe default
/// `max(default_gb, min_safe_gb)` is stored instead of leaving it unset.
pub struct ReservationService {
    telemetry: Arc<TelemetryProvider>,
    reclaimer: Reclaimer,
    slot: Arc<dyn ReservationSlot>,
    default_gb: f64,
}

impl ReservationService {
    pub fn new(
        telemetry: Arc<TelemetryProvider>,
        runtime: Arc<dyn CacheRuntime>,
        slot: Arc<dyn ReservationSlot>,
    ) -> Self {
        Self {
            reclaimer: Reclaimer::new(telemetry.clone(), runtime),
            telemetry,
            slot,
            default_gb: DEFAULT_TARGET_GB,
        }
    }

    /// Reservation (GB) used when sizing fails outright.
    pub fn with_default_gb(mut self, default_gb: f64) -> Self {
        self.default_gb = default_gb;
        self
    }

    pub fn telemetry(&self) -> &TelemetryProvider {
        &self.telemetry
    }

    pub fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }

    pub fn slot(&self) -> &dyn ReservationSlot {
        self.slot.as_ref()
    }

    pub fn apply(&self, options: &ApplyOptions) -> ReservationOutcome {
        let requested_device_index = options.request.device_index;
        let device_index = if self.telemetry.validate_index(requested_device_index) {
            requested_device_index
        } else {
            if requested_device_index != 0 {
                tracing::warn!(
                    target: "vram.service",
                    requested = requested_device_index,
                    "invalid device index; using device 0"
                );
            }
            0
        };

        let device_info = options.collect_device_info.then(|| {
            let info = self.telemetry.device_info(device_index);
            if info.available {
                tracing::info!(target: "vram.service", "{}", summarize_device_info(&info));
            } else {
                tracing::warn!(target: "vram.service", device = device_index, "device unavailable");
            }
            info
        });

        let reclaim = options
            .reclaim_before
            .then(|| self.reclaimer.reclaim(device_index));

        let request = ReservationRequest {
            device_index,
            ..options.request.clone()
        };

        let decided = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let snapshot = self.telemetry.snapshot(device_index);
            checked_decide(&request, snapshot)
        }));

        let (result, fell_back) = match decided {
            Ok(Ok(result)) => (result, false),
            Ok(Err(err)) => (self.fallback(&request, &err.to_string()), true),
            Err(_) => (self.fallback(&request, "internal panic"), true),
        };

        self.slot.store(result.bytes);
        tracing::info!(
            target: "vram.service",
            device = device_index,
            bytes = result.bytes,
            "{}",
            result.explanation
        );
        tracing::info!(
            target: "vram.service",
            "reserved memory set: {:.2}GB ({:.0}MB)",
            result.gb(),
            result.mb()
        );

        ReservationOutcome {
            device_index,
            requested_device_index,
            result,
            fell_back,
            reclaim,
            device_info,
        }
    }

    fn fallback(&self, request: &ReservationRequest, reason: &str) -> ReservationResult {
        let bytes = safe_default_bytes(self.default_gb, request.min_safe_gb);
        tracing::error!(
            target: "vram.service",
            reason,
            bytes,
            "reservation sizing failed; storing safe default"
        );
        ReservationResult {
            bytes,
            explanation: format!(
                "safe default: {:.2}GB (sizing failed: {reason})",
                bytes_to_gb(bytes)
            ),
            mode: request.mode.clone(),
            band: None,
            clamped: false,
            warnings: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ReservationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationService")
            .field("telemetry", &self.telemetry)
            .field("slot", &self.slot.load())
            .field("default_gb", &self.default_gb)
            .finish()
    }
}
