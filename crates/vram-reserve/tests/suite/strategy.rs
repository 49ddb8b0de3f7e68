use vram_reserve::{
    decide, gb_to_bytes, DecisionWarning, MemorySnapshot, PressureBand, ReservationMode,
    ReservationRequest, AUTO_RESERVED_RATIO, GB, MAX_RESERVED_RATIO,
};

const MODES: [&str; 4] = ["manual", "auto", "smart", "turbo"];

fn request(mode: &str, target_gb: f64, min_safe_gb: f64) -> ReservationRequest {
    ReservationRequest::new(ReservationMode::from_name(mode), target_gb, min_safe_gb)
}

fn snapshots() -> Vec<MemorySnapshot> {
    let mut out = Vec::new();
    for total in [8.0, 12.0, 24.0, 80.0] {
        for used_fraction in [0.0, 0.1, 0.3, 0.5, 0.7, 0.85, 0.95, 1.0] {
            let used = total * used_fraction;
            out.push(MemorySnapshot::new(total, used, total - used));
        }
    }
    out
}

#[test]
fn floor_holds_for_every_mode() {
    for mode in MODES {
        for target in [0.6, 1.0, 2.5, 8.0, 32.0] {
            for min_safe in [0.5, 2.0, 4.0] {
                let without = decide(&request(mode, target, min_safe), None);
                assert!(
                    without.bytes >= gb_to_bytes(min_safe),
                    "{mode} target={target} min_safe={min_safe}: {}",
                    without.explanation
                );

                for snapshot in snapshots() {
                    // The floor is only reachable when it fits under the device ceiling.
                    if min_safe > snapshot.total_gb * AUTO_RESERVED_RATIO {
                        continue;
                    }
                    let with = decide(&request(mode, target, min_safe), Some(snapshot));
                    assert!(
                        with.bytes >= gb_to_bytes(min_safe),
                        "{mode} {snapshot:?} target={target} min_safe={min_safe}: {}",
                        with.explanation
                    );
                }
            }
        }
    }
}

#[test]
fn ceilings_hold_with_a_snapshot() {
    for mode in MODES {
        let ratio = if mode == "auto" {
            AUTO_RESERVED_RATIO
        } else {
            MAX_RESERVED_RATIO
        };
        for target in [0.6, 1.0, 8.0, 32.0] {
            for snapshot in snapshots() {
                let result = decide(&request(mode, target, 2.0), Some(snapshot));
                assert!(
                    result.bytes <= gb_to_bytes(snapshot.total_gb * ratio),
                    "{mode} {snapshot:?} target={target}: {}",
                    result.explanation
                );
            }
        }
    }
}

#[test]
fn decisions_are_idempotent() {
    for mode in MODES {
        for snapshot in snapshots() {
            let req = request(mode, 1.5, 2.0);
            assert_eq!(decide(&req, Some(snapshot)), decide(&req, Some(snapshot)));
        }
        let req = request(mode, 1.5, 2.0);
        assert_eq!(decide(&req, None), decide(&req, None));
    }
}

#[test]
fn documented_examples() {
    let manual = decide(&request("manual", 1.0, 2.0), None);
    assert_eq!(manual.bytes, 2 * GB);

    let auto = decide(
        &request("auto", 1.0, 2.0),
        Some(MemorySnapshot::new(24.0, 10.0, 14.0)),
    );
    assert_eq!(auto.bytes, 11 * GB);
    assert!(!auto.clamped);

    let smart = decide(
        &request("smart", 1.0, 2.0),
        Some(MemorySnapshot::new(24.0, 20.0, 4.0)),
    );
    assert_eq!(smart.band, Some(PressureBand::Tight));
    assert_eq!(smart.bytes, 21 * GB);
}

#[test]
fn unknown_mode_matches_manual_everywhere() {
    for snapshot in snapshots().into_iter().map(Some).chain([None]) {
        let manual = decide(&request("manual", 3.0, 2.0), snapshot);
        let turbo = decide(&request("turbo", 3.0, 2.0), snapshot);
        assert_eq!(turbo.bytes, manual.bytes);
        assert!(turbo.warnings.contains(&DecisionWarning::UnknownMode {
            name: "turbo".to_owned()
        }));
    }
}

#[test]
fn every_clamp_is_explained() {
    for mode in MODES {
        for snapshot in snapshots() {
            let result = decide(&request(mode, 32.0, 2.0), Some(snapshot));
            if result.clamped {
                assert!(
                    result.explanation.contains("->"),
                    "{mode}: {}",
                    result.explanation
                );
            }
        }
    }
}

#[test]
fn every_floor_raise_is_explained() {
    for mode in MODES {
        for snapshot in snapshots().into_iter().map(Some).chain([None]) {
            let result = decide(&request(mode, 0.6, 4.0), snapshot);
            if result.bytes == gb_to_bytes(4.0) && !result.clamped {
                assert!(
                    result.explanation.contains("safety floor 4.00GB"),
                    "{mode} {snapshot:?}: {}",
                    result.explanation
                );
            }
        }
    }
}

#[test]
fn auto_with_corrupt_snapshot_falls_back_to_manual() {
    let corrupt = MemorySnapshot::new(24.0, f64::NAN, 14.0);
    let result = decide(&request("auto", 3.0, 2.0), Some(corrupt));
    let manual = decide(&request("manual", 3.0, 2.0), None);
    assert_eq!(result.bytes, manual.bytes);
    assert_eq!(result.mode, ReservationMode::Manual);
    assert!(result.warnings.contains(&DecisionWarning::SnapshotRejected));
    assert!(result
        .warnings
        .contains(&DecisionWarning::AutoFellBackToManual));
    assert!(result.explanation.contains("unusable"));
}

#[test]
fn manual_ignores_unusable_snapshots() {
    let manual = decide(&request("manual", 3.0, 2.0), None);
    for corrupt in [
        MemorySnapshot::new(f64::NAN, 1.0, 1.0),
        MemorySnapshot::new(0.0, 0.0, 0.0),
    ] {
        let result = decide(&request("manual", 3.0, 2.0), Some(corrupt));
        assert_eq!(result.bytes, manual.bytes, "{corrupt:?}");
        assert!(!result.clamped);
        assert!(result.warnings.contains(&DecisionWarning::SnapshotRejected));
    }
}

#[test]
fn non_finite_requests_get_the_safe_default_in_every_mode() {
    let snapshot = MemorySnapshot::new(24.0, 10.0, 14.0);
    for mode in MODES {
        for target in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = decide(&request(mode, target, 2.0), Some(snapshot));
            assert_eq!(result.bytes, 2 * GB, "{mode} target={target}");
            assert!(result.warnings.contains(&DecisionWarning::InvalidRequest));
            // The snapshot itself was fine.
            assert!(!result.warnings.contains(&DecisionWarning::SnapshotRejected));
            assert!(result.explanation.contains("safe default: 2.00GB"));
        }
    }
}

#[test]
fn safe_to_call_from_many_threads() {
    let snapshot = MemorySnapshot::new(24.0, 12.0, 12.0);
    let expected = decide(&request("smart", 1.0, 2.0), Some(snapshot));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            std::thread::spawn(move || {
                (0..100)
                    .map(|_| decide(&request("smart", 1.0, 2.0), Some(snapshot)).bytes)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for bytes in handle.join().unwrap() {
            assert_eq!(bytes, expected.bytes);
        }
    }
}
