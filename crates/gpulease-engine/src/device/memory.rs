use std::collections::{BTreeSet, HashMap};
use std::fmt;

use parking_lot::Mutex;

use super::{ConsumerId, DirectoryError, ResourceDirectory};

/// Queue handle issued by [`MemoryDirectory`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct QueueHandle(u64);

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue#{}", self.0)
    }
}

/// One contract call as observed by [`MemoryDirectory`].
///
/// `device_count` is a pure query and is not logged.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DirectoryCall {
    AcquireDevice { consumer: ConsumerId, device: u32 },
    ReleaseDevice { consumer: ConsumerId, device: u32 },
    AcquireQueue { consumer: ConsumerId, device: u32 },
    AdoptQueue { consumer: ConsumerId, queue: QueueHandle, device: u32 },
    ReleaseQueue { consumer: ConsumerId, queue: QueueHandle, device: u32 },
    SynchronizeQueue { queue: QueueHandle },
    ReserveQueue { queue: QueueHandle },
}

#[derive(Debug, Default)]
struct DeviceEntry {
    consumers: BTreeSet<ConsumerId>,
    reserved: Option<QueueHandle>,
    fail_acquire: bool,
    fail_queue: bool,
}

#[derive(Debug)]
struct QueueEntry {
    device: u32,
    holders: BTreeSet<ConsumerId>,
    pending: u64,
    completed: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    devices: Vec<DeviceEntry>,
    queues: HashMap<QueueHandle, QueueEntry>,
    next_queue: u64,
    fail_adopt: bool,
    fail_synchronize: bool,
    fail_reserve: bool,
    fail_submit: bool,
    calls: Vec<DirectoryCall>,
}

impl PoolState {
    fn device(&self, device: u32) -> Result<&DeviceEntry, DirectoryError> {
        self.devices
            .get(device as usize)
            .ok_or(DirectoryError::NoSuchDevice(device))
    }

    fn device_mut(&mut self, device: u32) -> Result<&mut DeviceEntry, DirectoryError> {
        self.devices
            .get_mut(device as usize)
            .ok_or(DirectoryError::NoSuchDevice(device))
    }

    fn ensure_registered(&self, consumer: ConsumerId, device: u32) -> Result<(), DirectoryError> {
        if self.device(device)?.consumers.contains(&consumer) {
            Ok(())
        } else {
            Err(DirectoryError::NotRegistered { consumer, device })
        }
    }
}

/// In-process device pool.
///
/// Simulates `n` devices with reference-counted queues: every
/// `acquire_queue` issues a private queue, `adopt_queue` adds a holder, and a
/// queue is retired when its last holder releases it. Work is simulated with
/// [`submit`](Self::submit); synchronization drains it.
///
/// Every contract call is logged in order, and each operation can be forced
/// to fail, which makes this the directory of choice for headless runs and
/// tests.
#[derive(Debug)]
pub struct MemoryDirectory {
    state: Mutex<PoolState>,
}

impl MemoryDirectory {
    pub fn new(device_count: u32) -> Self {
        let devices = (0..device_count).map(|_| DeviceEntry::default()).collect();
        Self {
            state: Mutex::new(PoolState {
                devices,
                next_queue: 1,
                ..Default::default()
            }),
        }
    }

    /// Makes `acquire_device` on `device` fail (or succeed again).
    pub fn fail_device(&self, device: u32, fail: bool) {
        if let Some(d) = self.state.lock().devices.get_mut(device as usize) {
            d.fail_acquire = fail;
        }
    }

    /// Makes `acquire_queue` on `device` fail (or succeed again).
    pub fn fail_queue(&self, device: u32, fail: bool) {
        if let Some(d) = self.state.lock().devices.get_mut(device as usize) {
            d.fail_queue = fail;
        }
    }

    /// Makes `adopt_queue` fail on every device (or succeed again).
    pub fn fail_adopt(&self, fail: bool) {
        self.state.lock().fail_adopt = fail;
    }

    pub fn fail_synchronize(&self, fail: bool) {
        self.state.lock().fail_synchronize = fail;
    }

    pub fn fail_reserve(&self, fail: bool) {
        self.state.lock().fail_reserve = fail;
    }

    /// Makes [`submit`](Self::submit) fail (or succeed again).
    pub fn fail_submit(&self, fail: bool) {
        self.state.lock().fail_submit = fail;
    }

    /// Enqueues one unit of simulated work on `queue`.
    pub fn submit(&self, queue: QueueHandle) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        if state.fail_submit {
            return Err(DirectoryError::Backend("submission disabled".to_string()));
        }
        let entry = state
            .queues
            .get_mut(&queue)
            .ok_or(DirectoryError::UnknownQueue)?;
        entry.pending += 1;
        Ok(())
    }

    /// Work submitted on `queue` that has not been synchronized yet.
    pub fn pending_work(&self, queue: QueueHandle) -> Option<u64> {
        self.state.lock().queues.get(&queue).map(|q| q.pending)
    }

    /// Work on `queue` that synchronization has drained so far.
    pub fn completed_work(&self, queue: QueueHandle) -> Option<u64> {
        self.state.lock().queues.get(&queue).map(|q| q.completed)
    }

    /// Number of consumers registered on `device`.
    pub fn device_consumers(&self, device: u32) -> usize {
        self.state
            .lock()
            .devices
            .get(device as usize)
            .map_or(0, |d| d.consumers.len())
    }

    /// Number of consumers holding `queue`; zero once retired.
    pub fn queue_holders(&self, queue: QueueHandle) -> usize {
        self.state
            .lock()
            .queues
            .get(&queue)
            .map_or(0, |q| q.holders.len())
    }

    /// Device `queue` was issued on, while it is live.
    pub fn queue_device(&self, queue: QueueHandle) -> Option<u32> {
        self.state.lock().queues.get(&queue).map(|q| q.device)
    }

    /// Queues that have not been retired.
    pub fn live_queues(&self) -> usize {
        self.state.lock().queues.len()
    }

    /// Queue last reserved on `device`, if it is still live.
    pub fn reserved_queue(&self, device: u32) -> Option<QueueHandle> {
        self.state
            .lock()
            .devices
            .get(device as usize)
            .and_then(|d| d.reserved)
    }

    /// Ordered log of contract calls.
    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

impl ResourceDirectory for MemoryDirectory {
    type Queue = QueueHandle;

    fn device_count(&self) -> u32 {
        self.state.lock().devices.len() as u32
    }

    fn acquire_device(&self, consumer: ConsumerId, device: u32) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(DirectoryCall::AcquireDevice { consumer, device });

        let entry = state.device_mut(device)?;
        if entry.fail_acquire {
            return Err(DirectoryError::DeviceRefused {
                device,
                reason: "acquisition disabled".to_string(),
            });
        }
        entry.consumers.insert(consumer);
        Ok(())
    }

    fn release_device(&self, consumer: ConsumerId, device: u32) {
        let mut state = self.state.lock();
        state.calls.push(DirectoryCall::ReleaseDevice { consumer, device });

        if let Ok(entry) = state.device_mut(device) {
            if !entry.consumers.remove(&consumer) {
                log::warn!("{consumer} released device {device} it did not hold");
            }
        }
    }

    fn acquire_queue(
        &self,
        consumer: ConsumerId,
        device: u32,
    ) -> Result<QueueHandle, DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(DirectoryCall::AcquireQueue { consumer, device });

        if state.device(device)?.fail_queue {
            return Err(DirectoryError::QueueRefused {
                device,
                reason: "queue issue disabled".to_string(),
            });
        }
        state.ensure_registered(consumer, device)?;

        let queue = QueueHandle(state.next_queue);
        state.next_queue += 1;
        state.queues.insert(
            queue,
            QueueEntry {
                device,
                holders: BTreeSet::from([consumer]),
                pending: 0,
                completed: 0,
            },
        );
        log::trace!("issued {queue} on device {device} to {consumer}");
        Ok(queue)
    }

    fn adopt_queue(
        &self,
        consumer: ConsumerId,
        queue: &QueueHandle,
        device: u32,
    ) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(DirectoryCall::AdoptQueue { consumer, queue: *queue, device });

        if state.fail_adopt {
            return Err(DirectoryError::QueueRefused {
                device,
                reason: "queue adoption disabled".to_string(),
            });
        }
        state.ensure_registered(consumer, device)?;
        match state.queues.get_mut(queue) {
            Some(entry) if entry.device == device => {
                entry.holders.insert(consumer);
                Ok(())
            }
            _ => Err(DirectoryError::UnknownQueue),
        }
    }

    fn release_queue(&self, consumer: ConsumerId, queue: &QueueHandle, device: u32) {
        let mut state = self.state.lock();
        state.calls.push(DirectoryCall::ReleaseQueue { consumer, queue: *queue, device });

        let Some(entry) = state.queues.get_mut(queue) else {
            log::warn!("{consumer} released unknown {queue}");
            return;
        };
        entry.holders.remove(&consumer);
        if !entry.holders.is_empty() {
            return;
        }

        state.queues.remove(queue);
        if let Ok(dev) = state.device_mut(device) {
            if dev.reserved == Some(*queue) {
                dev.reserved = None;
            }
        }
        log::trace!("retired {queue} on device {device}");
    }

    fn synchronize_queue(&self, queue: &QueueHandle) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(DirectoryCall::SynchronizeQueue { queue: *queue });

        if state.fail_synchronize {
            return Err(DirectoryError::Backend("synchronization disabled".to_string()));
        }
        let entry = state
            .queues
            .get_mut(queue)
            .ok_or(DirectoryError::UnknownQueue)?;
        entry.completed += entry.pending;
        entry.pending = 0;
        Ok(())
    }

    fn reserve_queue(&self, queue: &QueueHandle) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(DirectoryCall::ReserveQueue { queue: *queue });

        if state.fail_reserve {
            return Err(DirectoryError::Backend("reservation disabled".to_string()));
        }
        let device = state
            .queues
            .get(queue)
            .map(|q| q.device)
            .ok_or(DirectoryError::UnknownQueue)?;
        state.device_mut(device)?.reserved = Some(*queue);
        Ok(())
    }
}
