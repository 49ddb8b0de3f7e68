//! GPU memory reservation sizing.
//!
//! The core of this crate is [`decide`]: a pure function that turns a device memory
//! snapshot, a user target, a safety floor and a policy mode into a byte reservation
//! plus a human-readable derivation trace. Everything around it is "best-effort":
//! - Telemetry is read through a [`TelemetryProvider`] that never errors; missing data is
//!   `None` and every mode has a defined no-data fallback.
//! - Cache reclaim is cooperative via [`CacheRuntime`] implementors and serialized per
//!   device so before/after measurements never interleave.
//! - The computed value is handed to an externally owned [`ReservationSlot`]; this crate
//!   never allocates or frees device memory itself.

mod band;
mod reclaim;
mod report;
mod service;
mod slot;
mod strategy;
pub mod telemetry;
mod types;
mod units;

pub use band::{PressureBand, PressureBandThresholds};
pub use reclaim::{BatchReclaimReport, CacheRuntime, NoopRuntime, Reclaimer};
pub use report::{render_device_info, summarize_device_info};
pub use service::{ApplyOptions, ReservationOutcome, ReservationService};
pub use slot::{AtomicReservationSlot, ReservationSlot};
pub use strategy::{
    checked_decide, decide, safe_default_bytes, DecisionError, AUTO_RESERVED_RATIO,
    MAX_RESERVED_RATIO, SMART_NO_DATA_PAD_GB, TIGHT_RESERVED_RATIO,
};
pub use telemetry::{TelemetryBackend, TelemetryKind, TelemetryProvider};
pub use types::{
    DecisionWarning, DeviceInfo, MemorySnapshot, ReclaimReport, ReservationMode,
    ReservationRequest, ReservationResult,
};
pub use units::{bytes_to_gb, bytes_to_mb, gb_to_bytes, GB, MB};

/// Default user target (GB) when none is configured.
pub const DEFAULT_TARGET_GB: f64 = 1.0;
/// Smallest target (GB) accepted by input validation.
pub const MIN_TARGET_GB: f64 = 0.6;
/// Largest target (GB) accepted by input validation.
pub const MAX_TARGET_GB: f64 = 32.0;
/// Default safety floor (GB).
pub const DEFAULT_MIN_SAFE_GB: f64 = 2.0;
