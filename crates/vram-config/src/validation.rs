use crate::diagnostics::{ConfigValidationError, ConfigWarning, ValidationDiagnostics};
use crate::{
    LoggingConfig, VramConfig, MAX_DEVICE_INDEX, MAX_SAFETY_FLOOR_GB, MIN_SAFETY_FLOOR_GB,
};
use vram_reserve::{MAX_TARGET_GB, MIN_TARGET_GB};

impl VramConfig {
    /// Validate semantic invariants for a configuration.
    ///
    /// Validation is best-effort: it attempts to report as many problems as possible in one pass.
    #[must_use]
    pub fn validate(&self) -> ValidationDiagnostics {
        let mut out = ValidationDiagnostics::default();

        validate_reservation(self, &mut out);
        validate_logging(self, &mut out);

        out
    }
}

fn validate_reservation(config: &VramConfig, out: &mut ValidationDiagnostics) {
    let reservation = &config.reservation;

    check_range(
        "reservation.target_gb",
        reservation.target_gb,
        MIN_TARGET_GB,
        MAX_TARGET_GB,
        out,
    );
    check_range(
        "reservation.min_safe_gb",
        reservation.min_safe_gb,
        MIN_SAFETY_FLOOR_GB,
        MAX_SAFETY_FLOOR_GB,
        out,
    );

    if !reservation.default_gb.is_finite() || reservation.default_gb < 0.0 {
        out.errors.push(ConfigValidationError::InvalidValue {
            toml_path: "reservation.default_gb".to_owned(),
            message: format!(
                "must be a finite, non-negative number, got {}",
                reservation.default_gb
            ),
        });
    }

    if reservation.device_index > MAX_DEVICE_INDEX {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "reservation.device_index".to_owned(),
            message: format!(
                "must be <= {MAX_DEVICE_INDEX}, got {}; device 0 will be used",
                reservation.device_index
            ),
        });
    }

    if !reservation.mode().is_recognized() {
        out.warnings.push(ConfigWarning::UnknownReservationMode {
            value: reservation.mode.clone(),
        });
    }
}

fn check_range(toml_path: &str, value: f64, min: f64, max: f64, out: &mut ValidationDiagnostics) {
    if !value.is_finite() {
        out.errors.push(ConfigValidationError::InvalidValue {
            toml_path: toml_path.to_owned(),
            message: format!("must be a finite number, got {value}"),
        });
    } else if !(min..=max).contains(&value) {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: toml_path.to_owned(),
            message: format!(
                "must be between {min} and {max}, got {value}; clamped to {}",
                value.clamp(min, max)
            ),
        });
    }
}

fn validate_logging(config: &VramConfig, out: &mut ValidationDiagnostics) {
    let normalized = LoggingConfig::normalize_level_directives(&config.logging.level);
    if !config.logging.level.trim().is_empty()
        && tracing_subscriber::EnvFilter::try_new(normalized.clone()).is_err()
    {
        out.warnings.push(ConfigWarning::LoggingLevelInvalid {
            value: config.logging.level.clone(),
            normalized,
        });
    }
}
