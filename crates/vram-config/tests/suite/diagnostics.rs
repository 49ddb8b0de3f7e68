use vram_config::{ConfigError, ConfigValidationError, ConfigWarning, VramConfig};

#[test]
fn unknown_keys_are_reported_with_full_paths() {
    let text = r#"
[reservation]
target_gb = 1.5
minimum_gb = 2.0

[telemetry]
backend = "sysfs"
poll_ms = 100
"#;

    let (config, diagnostics) = VramConfig::load_from_str_with_diagnostics(text).unwrap();
    assert_eq!(config.reservation.target_gb, 1.5);
    assert_eq!(
        diagnostics.unknown_keys,
        vec!["reservation.minimum_gb", "telemetry.poll_ms"]
    );
    assert!(diagnostics.is_ok());
}

#[test]
fn out_of_range_values_warn_and_are_clamped() {
    let text = r#"
[reservation]
target_gb = 0.1
min_safe_gb = 12.0
device_index = 9
"#;

    let (config, diagnostics) = VramConfig::load_from_str_with_diagnostics(text).unwrap();
    assert!(diagnostics.is_ok());

    let paths: Vec<&str> = diagnostics
        .warnings
        .iter()
        .filter_map(|warning| match warning {
            ConfigWarning::InvalidValue { toml_path, .. } => Some(toml_path.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        paths,
        vec![
            "reservation.target_gb",
            "reservation.min_safe_gb",
            "reservation.device_index"
        ]
    );

    let request = config.reservation.effective_request();
    assert_eq!(request.target_gb, 0.6);
    assert_eq!(request.min_safe_gb, 8.0);
    assert_eq!(request.device_index, 0);
}

#[test]
fn unknown_mode_is_a_warning() {
    let (_config, diagnostics) =
        VramConfig::load_from_str_with_diagnostics("[reservation]\nmode = \"turbo\"\n").unwrap();
    assert_eq!(
        diagnostics.warnings,
        vec![ConfigWarning::UnknownReservationMode {
            value: "turbo".to_owned()
        }]
    );
    assert!(diagnostics.warnings[0].to_string().contains("manual"));
}

#[test]
fn non_finite_numbers_are_errors() {
    let (_config, diagnostics) =
        VramConfig::load_from_str_with_diagnostics("[reservation]\ntarget_gb = inf\n").unwrap();
    assert!(!diagnostics.is_ok());
    assert!(matches!(
        &diagnostics.errors[0],
        ConfigValidationError::InvalidValue { toml_path, .. } if toml_path == "reservation.target_gb"
    ));
}

#[test]
fn invalid_log_filter_is_a_warning() {
    let (_config, diagnostics) =
        VramConfig::load_from_str_with_diagnostics("[logging]\nlevel = \"vram=[\"\n").unwrap();
    assert!(diagnostics
        .warnings
        .iter()
        .any(|warning| matches!(warning, ConfigWarning::LoggingLevelInvalid { .. })));
}

#[test]
fn type_errors_do_not_echo_the_document() {
    let err = VramConfig::load_from_str_with_diagnostics("[reservation]\nreclaim_before = \"yes\"\n")
        .unwrap_err();
    let ConfigError::Toml(message) = err else {
        panic!("expected a toml error");
    };
    assert!(!message.contains("reclaim_before = "), "{message}");
}
