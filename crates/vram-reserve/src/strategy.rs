//! Reservation sizing policies.
//!
//! [`decide`] is pure: it reads nothing but its arguments, so it can be called from any
//! thread without coordination and always returns the same result for the same inputs.

use crate::band::{PressureBand, PressureBandThresholds};
use crate::types::{
    DecisionWarning, MemorySnapshot, ReservationMode, ReservationRequest, ReservationResult,
};
use crate::units::gb_to_bytes;
use crate::{DEFAULT_MIN_SAFE_GB, DEFAULT_TARGET_GB};
use std::fmt::Write as _;

/// No mode may reserve more than this fraction of total device memory.
pub const MAX_RESERVED_RATIO: f64 = 0.9;
/// Auto mode's own, stricter ceiling.
pub const AUTO_RESERVED_RATIO: f64 = 0.85;
/// Fraction of total memory smart mode reserves at minimum in the tight band.
pub const TIGHT_RESERVED_RATIO: f64 = 0.8;
/// Extra headroom smart mode adds when it has no telemetry.
pub const SMART_NO_DATA_PAD_GB: f64 = 1.0;

/// A request that cannot be sized at all.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecisionError {
    #[error("target_gb must be finite, got {0}")]
    NonFiniteTarget(f64),
    #[error("min_safe_gb must be a finite, non-negative number, got {0}")]
    InvalidSafetyFloor(f64),
}

struct ModeDecision {
    mode: ReservationMode,
    value_gb: f64,
    body: String,
    band: Option<PressureBand>,
    clamped: bool,
}

/// Compute the reservation for `request` given the current device state.
///
/// Never fails: unrecognized modes use manual semantics, each mode has a defined
/// fallback for missing or unusable telemetry, and a request whose numbers are not
/// usable gets the safe default. Every degradation is recorded in
/// [`ReservationResult::warnings`] and spelled out in the explanation.
pub fn decide(
    request: &ReservationRequest,
    snapshot: Option<MemorySnapshot>,
) -> ReservationResult {
    let mut warnings = Vec::new();

    let snapshot = match snapshot {
        Some(snapshot) if snapshot.is_usable() => Some(snapshot),
        Some(snapshot) => {
            tracing::warn!(
                target: "vram.strategy",
                total_gb = snapshot.total_gb,
                used_gb = snapshot.used_gb,
                free_gb = snapshot.free_gb,
                "ignoring unusable memory snapshot"
            );
            warnings.push(DecisionWarning::SnapshotRejected);
            None
        }
        None => None,
    };

    let sized = match &request.mode {
        _ if !request_is_usable(request) => {
            warnings.push(DecisionWarning::InvalidRequest);
            invalid_request(request)
        }
        ReservationMode::Manual => manual(request, snapshot, &mut warnings),
        ReservationMode::Auto => auto(request, snapshot, &mut warnings),
        ReservationMode::Smart => smart(request, snapshot, &mut warnings),
        ReservationMode::Unrecognized(name) => {
            warnings.push(DecisionWarning::UnknownMode { name: name.clone() });
            manual(request, snapshot, &mut warnings)
        }
    };

    let mut explanation = String::new();
    for warning in &warnings {
        // Missing telemetry is already part of each mode's own wording.
        if *warning != DecisionWarning::NoDeviceInfo {
            let _ = write!(explanation, "[warning: {warning}] ");
        }
    }
    explanation.push_str(&sized.body);

    let result = ReservationResult {
        bytes: gb_to_bytes(sized.value_gb),
        explanation,
        mode: sized.mode,
        band: sized.band,
        clamped: sized.clamped,
        warnings,
    };

    if result.is_degraded() {
        tracing::warn!(
            target: "vram.strategy",
            requested_mode = %request.mode,
            bytes = result.bytes,
            "{}",
            result.explanation
        );
    } else {
        tracing::debug!(
            target: "vram.strategy",
            requested_mode = %request.mode,
            bytes = result.bytes,
            "{}",
            result.explanation
        );
    }

    result
}

/// Like [`decide`], but rejects requests whose inputs are not numbers to begin with.
///
/// Callers at an outer boundary use the error to fall back to [`safe_default_bytes`].
pub fn checked_decide(
    request: &ReservationRequest,
    snapshot: Option<MemorySnapshot>,
) -> Result<ReservationResult, DecisionError> {
    if !request.target_gb.is_finite() {
        return Err(DecisionError::NonFiniteTarget(request.target_gb));
    }
    if !usable_floor(request.min_safe_gb) {
        return Err(DecisionError::InvalidSafetyFloor(request.min_safe_gb));
    }
    Ok(decide(request, snapshot))
}

/// Reservation used when sizing failed outright: `max(default_gb, min_safe_gb)`.
pub fn safe_default_bytes(default_gb: f64, min_safe_gb: f64) -> u64 {
    gb_to_bytes(default_gb.max(min_safe_gb))
}

fn usable_floor(min_safe_gb: f64) -> bool {
    min_safe_gb.is_finite() && min_safe_gb >= 0.0
}

fn request_is_usable(request: &ReservationRequest) -> bool {
    request.target_gb.is_finite() && usable_floor(request.min_safe_gb)
}

fn invalid_request(request: &ReservationRequest) -> ModeDecision {
    let floor = if usable_floor(request.min_safe_gb) {
        request.min_safe_gb
    } else {
        DEFAULT_MIN_SAFE_GB
    };
    let value = DEFAULT_TARGET_GB.max(floor);
    let mode = if request.mode.is_recognized() {
        request.mode.clone()
    } else {
        ReservationMode::Manual
    };
    ModeDecision {
        mode,
        value_gb: value,
        body: format!(
            "safe default: {value:.2}GB (target {}GB, safety floor {}GB)",
            request.target_gb, request.min_safe_gb
        ),
        band: None,
        clamped: false,
    }
}

fn floor_note(raw: f64, min_safe_gb: f64) -> String {
    if raw < min_safe_gb {
        format!(" [raised {raw:.2}GB to safety floor {min_safe_gb:.2}GB]")
    } else {
        String::new()
    }
}

fn note_floor_above_ceiling(
    min_safe_gb: f64,
    ceiling: f64,
    warnings: &mut Vec<DecisionWarning>,
) {
    if min_safe_gb > ceiling {
        warnings.push(DecisionWarning::FloorAboveCeiling);
    }
}

fn manual(
    request: &ReservationRequest,
    snapshot: Option<MemorySnapshot>,
    warnings: &mut Vec<DecisionWarning>,
) -> ModeDecision {
    let value = request.target_gb.max(request.min_safe_gb);
    let floor = floor_note(request.target_gb, request.min_safe_gb);

    let Some(snapshot) = snapshot else {
        warnings.push(DecisionWarning::NoDeviceInfo);
        return ModeDecision {
            mode: ReservationMode::Manual,
            value_gb: value,
            body: format!(
                "manual: {value:.2}GB (target {:.2}GB, no device info){floor}",
                request.target_gb
            ),
            band: None,
            clamped: false,
        };
    };

    let ceiling = snapshot.total_gb * MAX_RESERVED_RATIO;
    if value > ceiling {
        note_floor_above_ceiling(request.min_safe_gb, ceiling, warnings);
        return ModeDecision {
            mode: ReservationMode::Manual,
            value_gb: ceiling,
            body: format!(
                "manual: {value:.2}GB -> {ceiling:.2}GB (capped at {:.0}% of {:.2}GB total){floor}",
                MAX_RESERVED_RATIO * 100.0,
                snapshot.total_gb,
            ),
            band: None,
            clamped: true,
        };
    }

    ModeDecision {
        mode: ReservationMode::Manual,
        value_gb: value,
        body: format!(
            "manual: {value:.2}GB (total {:.2}GB, used {:.2}GB){floor}",
            snapshot.total_gb, snapshot.used_gb,
        ),
        band: None,
        clamped: false,
    }
}

fn auto(
    request: &ReservationRequest,
    snapshot: Option<MemorySnapshot>,
    warnings: &mut Vec<DecisionWarning>,
) -> ModeDecision {
    let Some(snapshot) = snapshot else {
        warnings.push(DecisionWarning::AutoFellBackToManual);
        return manual(request, None, warnings);
    };

    let raw = snapshot.used_gb + request.target_gb;
    let floored = raw.max(request.min_safe_gb);
    let ceiling = snapshot.total_gb * AUTO_RESERVED_RATIO;
    let safe = floored.min(ceiling);

    let floor = floor_note(raw, request.min_safe_gb);
    let clamped = floored > safe;
    let body = if clamped {
        note_floor_above_ceiling(request.min_safe_gb, ceiling, warnings);
        format!(
            "auto: {floored:.2}GB -> {safe:.2}GB (used {:.2}GB + buffer {:.2}GB, capped at {:.0}%){floor}",
            snapshot.used_gb,
            request.target_gb,
            AUTO_RESERVED_RATIO * 100.0,
        )
    } else {
        format!(
            "auto: {safe:.2}GB (used {:.2}GB + buffer {:.2}GB){floor}",
            snapshot.used_gb, request.target_gb,
        )
    };

    ModeDecision {
        mode: ReservationMode::Auto,
        value_gb: safe,
        body,
        band: None,
        clamped,
    }
}

fn smart(
    request: &ReservationRequest,
    snapshot: Option<MemorySnapshot>,
    warnings: &mut Vec<DecisionWarning>,
) -> ModeDecision {
    let Some(snapshot) = snapshot else {
        // Without data, bias toward extra headroom instead of bare manual sizing.
        warnings.push(DecisionWarning::NoDeviceInfo);
        let padded = request.target_gb + SMART_NO_DATA_PAD_GB;
        let value = padded.max(request.min_safe_gb);
        return ModeDecision {
            mode: ReservationMode::Smart,
            value_gb: value,
            body: format!(
                "smart: {value:.2}GB (no device info, +{SMART_NO_DATA_PAD_GB:.2}GB safety pad){}",
                floor_note(padded, request.min_safe_gb)
            ),
            band: None,
            clamped: false,
        };
    };

    let available_ratio = snapshot.available_ratio();
    let band = PressureBandThresholds::default().band_for_ratio(available_ratio);
    let base = snapshot.used_gb + request.target_gb;
    // The loose band's own `max(base, min_safe)` is the final floor step below.
    let banded = match band {
        PressureBand::Tight => base.max(snapshot.total_gb * TIGHT_RESERVED_RATIO),
        PressureBand::Medium | PressureBand::Loose => base,
    };

    let floored = banded.max(request.min_safe_gb);
    let ceiling = snapshot.total_gb * MAX_RESERVED_RATIO;
    let safe = floored.min(ceiling);

    let clamped = floored > safe;
    let mut body = format!(
        "smart: {safe:.2}GB (band {band}, free {:.2}GB/{:.2}GB = {:.1}%)",
        snapshot.free_gb,
        snapshot.total_gb,
        available_ratio * 100.0,
    );
    body.push_str(&floor_note(banded, request.min_safe_gb));
    if clamped {
        note_floor_above_ceiling(request.min_safe_gb, ceiling, warnings);
        let _ = write!(body, " [adjusted {floored:.2}GB -> {safe:.2}GB]");
    }

    ModeDecision {
        mode: ReservationMode::Smart,
        value_gb: safe,
        body,
        band: Some(band),
        clamped,
    }
}
