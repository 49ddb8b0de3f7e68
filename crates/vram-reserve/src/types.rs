use crate::band::PressureBand;
use crate::units::{bytes_to_gb, bytes_to_mb, GB};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Point-in-time read of device memory, in GB.
///
/// `used_gb + free_gb` is expected to be close to `total_gb` but this is not enforced; the
/// numbers come straight from the device driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
}

impl MemorySnapshot {
    pub fn new(total_gb: f64, used_gb: f64, free_gb: f64) -> Self {
        Self {
            total_gb,
            used_gb,
            free_gb,
        }
    }

    pub fn from_bytes(total: u64, used: u64, free: u64) -> Self {
        Self {
            total_gb: total as f64 / GB as f64,
            used_gb: used as f64 / GB as f64,
            free_gb: free as f64 / GB as f64,
        }
    }

    /// Whether the snapshot can drive a sizing decision: every field finite and
    /// non-negative, and a non-zero total.
    pub fn is_usable(&self) -> bool {
        [self.total_gb, self.used_gb, self.free_gb]
            .iter()
            .all(|value| value.is_finite() && *value >= 0.0)
            && self.total_gb > 0.0
    }

    /// Fraction of total memory that is currently free.
    pub fn available_ratio(&self) -> f64 {
        self.free_gb / self.total_gb
    }

    pub fn usage_percent(&self) -> f64 {
        self.used_gb / self.total_gb * 100.0
    }
}

/// Sizing policy selected by the caller.
///
/// Parsing never fails: names other than `manual`, `auto` and `smart` are kept as
/// [`ReservationMode::Unrecognized`] and sized with manual semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReservationMode {
    Manual,
    Auto,
    #[default]
    Smart,
    Unrecognized(String),
}

impl ReservationMode {
    pub fn from_name(name: &str) -> Self {
        let trimmed = name.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "manual" => ReservationMode::Manual,
            "auto" => ReservationMode::Auto,
            "smart" => ReservationMode::Smart,
            _ => ReservationMode::Unrecognized(trimmed.to_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ReservationMode::Manual => "manual",
            ReservationMode::Auto => "auto",
            ReservationMode::Smart => "smart",
            ReservationMode::Unrecognized(name) => name,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, ReservationMode::Unrecognized(_))
    }
}

impl From<String> for ReservationMode {
    fn from(value: String) -> Self {
        ReservationMode::from_name(&value)
    }
}

impl From<ReservationMode> for String {
    fn from(value: ReservationMode) -> Self {
        value.name().to_owned()
    }
}

impl fmt::Display for ReservationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Caller intent for one sizing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Fixed reservation (manual) or buffer on top of current usage (auto/smart), in GB.
    pub target_gb: f64,
    pub mode: ReservationMode,
    /// Lower bound for the reservation, in GB.
    pub min_safe_gb: f64,
    pub device_index: u32,
}

impl ReservationRequest {
    pub fn new(mode: ReservationMode, target_gb: f64, min_safe_gb: f64) -> Self {
        Self {
            target_gb,
            mode,
            min_safe_gb,
            device_index: 0,
        }
    }

    pub fn on_device(mut self, device_index: u32) -> Self {
        self.device_index = device_index;
        self
    }
}

/// A degradation applied while sizing. Every one of these is also spelled out in the
/// explanation string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionWarning {
    /// The mode name was not recognized; manual semantics were used.
    UnknownMode { name: String },
    /// No device telemetry was available.
    NoDeviceInfo,
    /// Auto mode had no telemetry and used manual semantics.
    AutoFellBackToManual,
    /// Telemetry was present but unusable (non-finite, negative or zero total).
    SnapshotRejected,
    /// The device ceiling is below the safety floor; the ceiling was applied.
    FloorAboveCeiling,
    /// Target or safety floor was not a usable number; the safe default was used.
    InvalidRequest,
}

impl fmt::Display for DecisionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionWarning::UnknownMode { name } => {
                write!(f, "unknown mode '{name}', using manual")
            }
            DecisionWarning::NoDeviceInfo => f.write_str("no device info"),
            DecisionWarning::AutoFellBackToManual => {
                f.write_str("auto mode needs device info, falling back to manual")
            }
            DecisionWarning::SnapshotRejected => {
                f.write_str("device telemetry was unusable and has been ignored")
            }
            DecisionWarning::FloorAboveCeiling => {
                f.write_str("safety floor exceeds the device ceiling")
            }
            DecisionWarning::InvalidRequest => {
                f.write_str("request is not a usable number, using the safe default")
            }
        }
    }
}

/// Outcome of one sizing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationResult {
    pub bytes: u64,
    /// Deterministic derivation trace: mode, inputs used, clamping applied.
    pub explanation: String,
    /// Mode whose semantics produced `bytes` (after unknown-mode and no-data fallbacks).
    pub mode: ReservationMode,
    /// Smart-mode pressure band, when one was computed.
    pub band: Option<PressureBand>,
    /// Whether a device ceiling lowered the value.
    pub clamped: bool,
    pub warnings: Vec<DecisionWarning>,
}

impl ReservationResult {
    pub fn gb(&self) -> f64 {
        bytes_to_gb(self.bytes)
    }

    pub fn mb(&self) -> f64 {
        bytes_to_mb(self.bytes)
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Result of one reclaim pass on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReclaimReport {
    pub device_index: u32,
    pub attempted: bool,
    /// `used_before - used_after`; may be negative under concurrent allocation. `0.0` when
    /// either measurement is missing.
    pub freed_gb: f64,
    pub before: Option<MemorySnapshot>,
    pub after: Option<MemorySnapshot>,
    /// Whether the allocator accepted the cache release request.
    pub allocator_released: bool,
    /// Objects reclaimed by the generic collection pass (advisory).
    pub gc_collected: u64,
    /// Model-cache release outcome; `None` unless the aggressive path ran.
    pub model_cache_released: Option<bool>,
}

impl ReclaimReport {
    /// Report for a device that was never touched.
    pub fn skipped(device_index: u32) -> Self {
        Self {
            device_index,
            attempted: false,
            freed_gb: 0.0,
            before: None,
            after: None,
            allocator_released: false,
            gc_collected: 0,
            model_cache_released: None,
        }
    }

    pub fn freed_mb(&self) -> f64 {
        self.freed_gb * 1024.0
    }

    pub fn measured(&self) -> bool {
        self.before.is_some() && self.after.is_some()
    }
}

/// Best-effort device details; each field is queried independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub index: u32,
    /// Whether `index` names an enumerated device.
    pub available: bool,
    pub name: Option<String>,
    pub memory: Option<MemorySnapshot>,
    pub temperature_c: Option<u32>,
    pub utilization_percent: Option<u32>,
}

impl DeviceInfo {
    pub fn unavailable(index: u32) -> Self {
        Self {
            index,
            available: false,
            name: None,
            memory: None,
            temperature_c: None,
            utilization_percent: None,
        }
    }
}
