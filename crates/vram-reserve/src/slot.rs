use std::sync::atomic::{AtomicU64, Ordering};

/// The externally owned "extra reserved memory" setting consumed by a downstream
/// allocator. Sizing results are written here; this crate never reads it back to make a
/// decision.
pub trait ReservationSlot: Send + Sync {
    fn store(&self, bytes: u64);

    /// Last stored value, if any.
    fn load(&self) -> Option<u64>;
}

/// In-process slot backed by an atomic.
#[derive(Debug)]
pub struct AtomicReservationSlot {
    bytes: AtomicU64,
}

const UNSET: u64 = u64::MAX;

impl AtomicReservationSlot {
    pub fn new() -> Self {
        Self {
            bytes: AtomicU64::new(UNSET),
        }
    }
}

impl Default for AtomicReservationSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationSlot for AtomicReservationSlot {
    fn store(&self, bytes: u64) {
        // `u64::MAX` marks "unset"; nobody reserves 16 EiB.
        self.bytes.store(bytes.min(UNSET - 1), Ordering::Release);
    }

    fn load(&self) -> Option<u64> {
        match self.bytes.load(Ordering::Acquire) {
            UNSET => None,
            bytes => Some(bytes),
        }
    }
}
