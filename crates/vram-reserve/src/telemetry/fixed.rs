use super::TelemetryBackend;
use crate::types::MemorySnapshot;
use parking_lot::RwLock;

/// One simulated device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixedDevice {
    pub name: Option<String>,
    /// `None` simulates a failing memory query.
    pub memory: Option<MemorySnapshot>,
    pub temperature_c: Option<u32>,
    pub utilization_percent: Option<u32>,
}

impl FixedDevice {
    /// Device with `total_gb` of memory of which `used_gb` is in use.
    pub fn with_memory(total_gb: f64, used_gb: f64) -> Self {
        Self {
            memory: Some(MemorySnapshot::new(total_gb, used_gb, total_gb - used_gb)),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// In-memory device table.
///
/// Used for simulations and tests; devices can be updated through `&self` while the
/// backend is owned by a [`super::TelemetryProvider`] (share it via `Arc`).
#[derive(Debug, Default)]
pub struct FixedBackend {
    devices: RwLock<Vec<FixedDevice>>,
}

impl FixedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device: FixedDevice) -> Self {
        self.devices.write().push(device);
        self
    }

    pub fn set_memory(&self, index: u32, memory: Option<MemorySnapshot>) {
        if let Some(device) = self.devices.write().get_mut(index as usize) {
            device.memory = memory;
        }
    }

    /// Make memory queries for `index` fail from now on.
    pub fn fail_memory(&self, index: u32) {
        self.set_memory(index, None);
    }

    /// Move `used_gb` to a new value, keeping total constant.
    pub fn set_used_gb(&self, index: u32, used_gb: f64) {
        if let Some(device) = self.devices.write().get_mut(index as usize) {
            if let Some(memory) = device.memory.as_mut() {
                memory.used_gb = used_gb;
                memory.free_gb = memory.total_gb - used_gb;
            }
        }
    }

    fn device<T>(&self, index: u32, f: impl FnOnce(&FixedDevice) -> Option<T>) -> Option<T> {
        self.devices.read().get(index as usize).and_then(f)
    }
}

impl TelemetryBackend for FixedBackend {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn device_count(&self) -> u32 {
        self.devices.read().len() as u32
    }

    fn memory_snapshot(&self, index: u32) -> Option<MemorySnapshot> {
        self.device(index, |device| device.memory)
    }

    fn device_name(&self, index: u32) -> Option<String> {
        self.device(index, |device| device.name.clone())
    }

    fn temperature(&self, index: u32) -> Option<u32> {
        self.device(index, |device| device.temperature_c)
    }

    fn utilization(&self, index: u32) -> Option<u32> {
        self.device(index, |device| device.utilization_percent)
    }
}
