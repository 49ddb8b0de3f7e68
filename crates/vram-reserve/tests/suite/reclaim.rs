use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vram_reserve::telemetry::{FixedBackend, FixedDevice};
use vram_reserve::{
    CacheRuntime, MemorySnapshot, NoopRuntime, Reclaimer, TelemetryBackend, TelemetryProvider,
};

/// Runtime whose allocator release drops device usage to a fixed value.
struct ReleasingRuntime {
    backend: Arc<FixedBackend>,
    used_after_gb: f64,
    gc_runs: AtomicU64,
}

impl CacheRuntime for ReleasingRuntime {
    fn release_allocator_cache(&self, device_index: u32) -> bool {
        self.backend.set_used_gb(device_index, self.used_after_gb);
        true
    }

    fn run_generic_gc(&self) -> u64 {
        self.gc_runs.fetch_add(1, Ordering::SeqCst);
        7
    }

    fn release_model_cache(&self) -> bool {
        true
    }
}

#[test]
fn freed_memory_is_measured_around_the_release() {
    let backend = Arc::new(FixedBackend::new().with_device(FixedDevice::with_memory(24.0, 10.0)));
    let runtime = Arc::new(ReleasingRuntime {
        backend: backend.clone(),
        used_after_gb: 6.0,
        gc_runs: AtomicU64::new(0),
    });
    let reclaimer = Reclaimer::new(Arc::new(TelemetryProvider::new(backend)), runtime.clone());

    let report = reclaimer.reclaim(0);
    assert!(report.attempted);
    assert!(report.allocator_released);
    assert_eq!(report.freed_gb, 4.0);
    assert_eq!(report.freed_mb(), 4096.0);
    assert_eq!(report.gc_collected, 7);
    assert_eq!(report.model_cache_released, None);
    assert_eq!(runtime.gc_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn growth_during_reclaim_is_reported_as_negative() {
    let backend = Arc::new(FixedBackend::new().with_device(FixedDevice::with_memory(24.0, 10.0)));
    let runtime = Arc::new(ReleasingRuntime {
        backend: backend.clone(),
        used_after_gb: 12.0,
        gc_runs: AtomicU64::new(0),
    });
    let reclaimer = Reclaimer::new(Arc::new(TelemetryProvider::new(backend)), runtime);

    let report = reclaimer.reclaim(0);
    assert!(report.measured());
    assert_eq!(report.freed_gb, -2.0);
}

/// Backend that answers the first memory query and fails every later one.
struct FailsAfterFirst {
    calls: AtomicU64,
}

impl TelemetryBackend for FailsAfterFirst {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn device_count(&self) -> u32 {
        1
    }

    fn memory_snapshot(&self, _index: u32) -> Option<MemorySnapshot> {
        (self.calls.fetch_add(1, Ordering::SeqCst) == 0)
            .then(|| MemorySnapshot::new(16.0, 8.0, 8.0))
    }
}

#[test]
fn failed_after_measurement_reports_zero_freed() {
    let telemetry = Arc::new(TelemetryProvider::new(FailsAfterFirst {
        calls: AtomicU64::new(0),
    }));
    let reclaimer = Reclaimer::new(telemetry, Arc::new(NoopRuntime));

    let report = reclaimer.reclaim(0);
    assert!(report.attempted);
    assert!(report.before.is_some());
    assert!(report.after.is_none());
    assert!(!report.measured());
    assert_eq!(report.freed_gb, 0.0);
}

struct PanickingRuntime;

impl CacheRuntime for PanickingRuntime {
    fn release_allocator_cache(&self, _device_index: u32) -> bool {
        panic!("allocator exploded");
    }

    fn run_generic_gc(&self) -> u64 {
        3
    }

    fn release_model_cache(&self) -> bool {
        panic!("model cache exploded");
    }
}

#[test]
fn a_panicking_step_does_not_abort_the_rest() {
    let telemetry = Arc::new(TelemetryProvider::new(
        FixedBackend::new().with_device(FixedDevice::with_memory(8.0, 2.0)),
    ));
    let reclaimer = Reclaimer::new(telemetry, Arc::new(PanickingRuntime));

    let report = reclaimer.reclaim_aggressive(0);
    assert!(report.attempted);
    assert!(!report.allocator_released);
    assert_eq!(report.model_cache_released, Some(false));
    assert_eq!(report.gc_collected, 3);
    assert!(report.measured());
}

#[test]
fn batch_covers_every_device_and_sums_freed() {
    let backend = Arc::new(
        FixedBackend::new()
            .with_device(FixedDevice::with_memory(24.0, 10.0))
            .with_device(FixedDevice::with_memory(24.0, 8.0)),
    );
    let runtime = Arc::new(ReleasingRuntime {
        backend: backend.clone(),
        used_after_gb: 6.0,
        gc_runs: AtomicU64::new(0),
    });
    let reclaimer = Reclaimer::new(Arc::new(TelemetryProvider::new(backend)), runtime);

    let batch = reclaimer.reclaim_all(true);
    assert!(batch.aggressive);
    assert_eq!(batch.devices.len(), 2);
    assert_eq!(batch.devices[0].freed_gb, 4.0);
    assert_eq!(batch.devices[1].freed_gb, 2.0);
    assert_eq!(batch.total_freed_gb, 6.0);
    assert!(batch
        .devices
        .iter()
        .all(|report| report.model_cache_released == Some(true)));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Measure(u32),
    Release(u32),
}

struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl TelemetryBackend for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn device_count(&self) -> u32 {
        2
    }

    fn memory_snapshot(&self, index: u32) -> Option<MemorySnapshot> {
        self.events.lock().push(Event::Measure(index));
        Some(MemorySnapshot::new(16.0, 4.0, 12.0))
    }
}

struct SlowRuntime {
    recorder: Arc<Recorder>,
}

impl CacheRuntime for SlowRuntime {
    fn release_allocator_cache(&self, device_index: u32) -> bool {
        self.recorder.events.lock().push(Event::Release(device_index));
        std::thread::sleep(Duration::from_millis(2));
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
fn reclaims_on_one_device_never_interleave() {
    let recorder = Arc::new(Recorder {
        events: Mutex::new(Vec::new()),
    });
    let telemetry = Arc::new(TelemetryProvider::new(recorder.clone()));
    let reclaimer = Arc::new(Reclaimer::new(
        telemetry,
        Arc::new(SlowRuntime {
            recorder: recorder.clone(),
        }),
    ));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let reclaimer = reclaimer.clone();
            std::thread::spawn(move || {
                for _ in 0..5 {
                    reclaimer.reclaim(i % 2);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let events = recorder.events.lock().clone();
    for device in 0..2 {
        let per_device: Vec<Event> = events
            .iter()
            .copied()
            .filter(|event| matches!(event, Event::Measure(d) | Event::Release(d) if *d == device))
            .collect();
        assert_eq!(per_device.len(), 15 * 3);
        for window in per_device.chunks(3) {
            assert_eq!(
                window,
                [
                    Event::Measure(device),
                    Event::Release(device),
                    Event::Measure(device)
                ]
            );
        }
    }
}

#[test]
fn devices_that_do_not_exist_are_never_touched() {
    let backend = Arc::new(FixedBackend::new().with_device(FixedDevice::with_memory(24.0, 10.0)));
    let runtime = Arc::new(ReleasingRuntime {
        backend: backend.clone(),
        used_after_gb: 6.0,
        gc_runs: AtomicU64::new(0),
    });
    let reclaimer = Reclaimer::new(Arc::new(TelemetryProvider::new(backend)), runtime.clone());

    let batch = reclaimer.reclaim_batch([3, 0], true);
    assert!(!batch.devices[0].attempted);
    assert_eq!(batch.devices[0].gc_collected, 0);
    assert!(batch.devices[1].attempted);
    assert_eq!(batch.total_freed_gb, 4.0);
    assert_eq!(runtime.gc_runs.load(Ordering::SeqCst), 1);
    assert!(batch.render().contains("device 3: skipped (no such device)"));
}
