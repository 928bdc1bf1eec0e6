use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity a handle presents to the resource directory.
///
/// Every [`GpuHandle`](super::GpuHandle) draws a fresh id at construction; the
/// directory uses it to track which consumers hold which device and queue.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ConsumerId(u64);

static NEXT_CONSUMER: AtomicU64 = AtomicU64::new(1);

impl ConsumerId {
    /// Allocates a process-unique consumer id.
    pub fn next() -> Self {
        Self(NEXT_CONSUMER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer#{}", self.0)
    }
}

/// What the owner's lifecycle hooks should do with GPU-resident payload when
/// the binding changes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum DataPolicy {
    /// Drop existing payload; the owner rebuilds from scratch.
    #[default]
    Discard,
    /// Best-effort carry of existing payload to the new device.
    PreserveData,
}

impl DataPolicy {
    #[inline]
    pub fn preserves_data(self) -> bool {
        matches!(self, DataPolicy::PreserveData)
    }
}

impl From<bool> for DataPolicy {
    fn from(preserve: bool) -> Self {
        if preserve {
            DataPolicy::PreserveData
        } else {
            DataPolicy::Discard
        }
    }
}

/// A device index together with the queue issued for it.
///
/// A handle either holds one of these or nothing, so a device without a queue
/// (or the reverse) cannot be expressed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Binding<Q> {
    pub device: u32,
    pub queue: Q,
}

/// Owner-side lifecycle contract.
///
/// The handle calls `deinitialize` while the old binding is still live (so the
/// owner can drain or stage data through the old queue) and `reinitialize`
/// once the new binding is complete.
pub trait DeviceHooks<Q> {
    /// Rebuild GPU-resident state on the newly bound device.
    fn reinitialize(&mut self, binding: &Binding<Q>, policy: DataPolicy);

    /// Tear down GPU-resident state on the device about to be relinquished.
    fn deinitialize(&mut self, binding: &Binding<Q>, policy: DataPolicy);
}

/// Hooks for owners that keep nothing on the device.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoHooks;

impl<Q> DeviceHooks<Q> for NoHooks {
    fn reinitialize(&mut self, _binding: &Binding<Q>, _policy: DataPolicy) {}
    fn deinitialize(&mut self, _binding: &Binding<Q>, _policy: DataPolicy) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_ids_are_unique() {
        let a = ConsumerId::next();
        let b = ConsumerId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn policy_from_bool() {
        assert_eq!(DataPolicy::from(true), DataPolicy::PreserveData);
        assert_eq!(DataPolicy::from(false), DataPolicy::Discard);
        assert!(!DataPolicy::default().preserves_data());
    }
}
