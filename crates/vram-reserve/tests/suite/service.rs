use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vram_reserve::telemetry::{FixedBackend, FixedDevice};
use vram_reserve::{
    ApplyOptions, AtomicReservationSlot, CacheRuntime, NoopRuntime, ReservationMode,
    ReservationRequest, ReservationService, ReservationSlot, TelemetryProvider, GB,
};

fn service_with(devices: &[FixedDevice]) -> (ReservationService, Arc<AtomicReservationSlot>) {
    let backend = devices
        .iter()
        .cloned()
        .fold(FixedBackend::new(), FixedBackend::with_device);
    let slot = Arc::new(AtomicReservationSlot::new());
    let service = ReservationService::new(
        Arc::new(TelemetryProvider::new(backend)),
        Arc::new(NoopRuntime),
        slot.clone(),
    );
    (service, slot)
}

#[test]
fn apply_stores_the_decision_in_the_slot() {
    let (service, slot) = service_with(&[FixedDevice::with_memory(24.0, 10.0)]);
    let request = ReservationRequest::new(ReservationMode::Auto, 1.0, 2.0);

    let outcome = service.apply(&ApplyOptions::new(request));
    assert!(!outcome.fell_back);
    assert_eq!(outcome.bytes(), 11 * GB);
    assert_eq!(slot.load(), Some(11 * GB));
    assert_eq!(service.slot().load(), Some(11 * GB));
}

#[test]
fn non_finite_target_stores_the_safe_default() {
    let (service, slot) = service_with(&[FixedDevice::with_memory(24.0, 10.0)]);
    let request = ReservationRequest::new(ReservationMode::Smart, f64::NAN, 2.0);

    let outcome = service.apply(&ApplyOptions::new(request));
    assert!(outcome.fell_back);
    assert_eq!(outcome.bytes(), 2 * GB);
    assert_eq!(slot.load(), Some(2 * GB));
    assert!(outcome.result.explanation.starts_with("safe default: 2.00GB"));
}

#[test]
fn safe_default_prefers_the_larger_of_default_and_floor() {
    let (service, slot) = service_with(&[]);
    let service = service.with_default_gb(3.0);
    let request = ReservationRequest::new(ReservationMode::Manual, f64::INFINITY, 2.0);

    let outcome = service.apply(&ApplyOptions::new(request));
    assert!(outcome.fell_back);
    assert_eq!(slot.load(), Some(3 * GB));
}

#[test]
fn out_of_range_device_is_redirected_to_device_zero() {
    let (service, _slot) = service_with(&[FixedDevice::with_memory(24.0, 10.0)]);
    let request = ReservationRequest::new(ReservationMode::Auto, 1.0, 2.0).on_device(5);

    let outcome = service.apply(&ApplyOptions::new(request));
    assert_eq!(outcome.requested_device_index, 5);
    assert_eq!(outcome.device_index, 0);
    assert_eq!(outcome.bytes(), 11 * GB);
}

#[test]
fn no_telemetry_still_writes_the_slot() {
    let (service, slot) = service_with(&[]);
    let request = ReservationRequest::new(ReservationMode::Smart, 1.0, 2.0);

    let outcome = service.apply(&ApplyOptions::new(request));
    assert!(!outcome.fell_back);
    assert_eq!(outcome.bytes(), 2 * GB);
    assert_eq!(slot.load(), Some(2 * GB));
}

#[test]
fn failing_memory_query_uses_the_no_data_fallback() {
    let backend = Arc::new(FixedBackend::new().with_device(FixedDevice::with_memory(24.0, 10.0)));
    backend.fail_memory(0);
    let slot = Arc::new(AtomicReservationSlot::new());
    let service = ReservationService::new(
        Arc::new(TelemetryProvider::new(backend)),
        Arc::new(NoopRuntime),
        slot.clone(),
    );

    let outcome = service.apply(&ApplyOptions::new(ReservationRequest::new(
        ReservationMode::Smart,
        2.0,
        2.0,
    )));
    assert_eq!(outcome.device_index, 0);
    assert_eq!(outcome.bytes(), 3 * GB);
    assert!(outcome.result.explanation.contains("no device info"));
    assert_eq!(slot.load(), Some(3 * GB));
}

#[test]
fn device_info_is_collected_on_request() {
    let (service, _slot) =
        service_with(&[FixedDevice::with_memory(16.0, 4.0).named("Test GPU")]);
    let mut options = ApplyOptions::new(ReservationRequest::new(ReservationMode::Manual, 1.0, 2.0));
    options.collect_device_info = true;

    let outcome = service.apply(&options);
    let info = outcome.device_info.expect("device info requested");
    assert!(info.available);
    assert_eq!(info.name.as_deref(), Some("Test GPU"));
    assert!(outcome.reclaim.is_none());
}

struct FlagRuntime {
    released: AtomicBool,
}

impl CacheRuntime for FlagRuntime {
    fn release_allocator_cache(&self, _device_index: u32) -> bool {
        self.released.store(true, Ordering::SeqCst);
        true
    }

    fn run_generic_gc(&self) -> u64 {
        0
    }

    fn release_model_cache(&self) -> bool {
        false
    }
}

#[test]
fn reclaim_before_runs_ahead_of_sizing() {
    let runtime = Arc::new(FlagRuntime {
        released: AtomicBool::new(false),
    });
    let slot = Arc::new(AtomicReservationSlot::new());
    let service = ReservationService::new(
        Arc::new(TelemetryProvider::new(
            FixedBackend::new().with_device(FixedDevice::with_memory(24.0, 10.0)),
        )),
        runtime.clone(),
        slot,
    );
    let mut options = ApplyOptions::new(ReservationRequest::new(ReservationMode::Auto, 1.0, 2.0));
    options.reclaim_before = true;

    let outcome = service.apply(&options);
    assert!(runtime.released.load(Ordering::SeqCst));
    let reclaim = outcome.reclaim.expect("reclaim requested");
    assert!(reclaim.attempted);
    assert!(reclaim.allocator_released);
}
