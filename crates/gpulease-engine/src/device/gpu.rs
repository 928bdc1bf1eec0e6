use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use state::InitCell;

use super::{ConsumerId, DirectoryError, ResourceDirectory, WgpuDirectoryConfig};

/// Logical queue issued by [`WgpuDirectory`].
///
/// wgpu exposes a single hardware queue per device; the directory hands out
/// logical queues on top of it so that ownership, sharing and reservation can
/// be tracked per consumer. Two `WgpuQueue`s are equal when they are the same
/// logical queue.
#[derive(Debug, Clone)]
pub struct WgpuQueue {
    id: u64,
    device_index: u32,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl PartialEq for WgpuQueue {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl WgpuQueue {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Index of the device this queue was issued on.
    pub fn device_index(&self) -> u32 {
        self.device_index
    }

    /// Returns a reference to the logical device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns a reference to the command queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Submits recorded command buffers.
    pub fn submit<I>(&self, command_buffers: I) -> wgpu::SubmissionIndex
    where
        I: IntoIterator<Item = wgpu::CommandBuffer>,
    {
        self.queue.submit(command_buffers)
    }
}

#[derive(Default)]
struct DeviceSlot {
    consumers: BTreeSet<ConsumerId>,
    open: Option<(wgpu::Device, wgpu::Queue)>,
    active: Option<u64>,
}

struct QueueSlot {
    device: u32,
    holders: BTreeSet<ConsumerId>,
}

struct WgpuState {
    devices: Vec<DeviceSlot>,
    queues: HashMap<u64, QueueSlot>,
    next_queue: u64,
}

impl WgpuState {
    fn slot_mut(&mut self, device: u32) -> Result<&mut DeviceSlot, DirectoryError> {
        self.devices
            .get_mut(device as usize)
            .ok_or(DirectoryError::NoSuchDevice(device))
    }

    /// Closes `device` once nobody is registered and no queue on it is live.
    fn close_if_idle(&mut self, device: u32) {
        let in_use = self.queues.values().any(|q| q.device == device);
        if let Ok(slot) = self.slot_mut(device) {
            if slot.consumers.is_empty() && !in_use && slot.open.take().is_some() {
                slot.active = None;
                log::debug!("closed wgpu device {device}");
            }
        }
    }
}

static SHARED: InitCell<Arc<WgpuDirectory>> = InitCell::new();

/// Resource directory backed by wgpu adapters.
///
/// Each adapter is one device. The `wgpu::Device`/`wgpu::Queue` pair for an
/// adapter is opened on first registration and closed again when its last
/// consumer and last logical queue are gone.
pub struct WgpuDirectory {
    adapters: Vec<wgpu::Adapter>,
    config: WgpuDirectoryConfig,
    state: Mutex<WgpuState>,
}

impl WgpuDirectory {
    /// Discovers adapters according to `config`.
    ///
    /// Adapter acquisition is asynchronous under wgpu.
    pub async fn new(config: WgpuDirectoryConfig) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });

        let primary = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let mut adapters = vec![primary];

        if config.include_fallback_adapter {
            let fallback = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                })
                .await
                .ok();

            if let Some(fallback) = fallback {
                let info = fallback.get_info();
                let duplicate = adapters.iter().any(|a| {
                    let known = a.get_info();
                    known.name == info.name && known.backend == info.backend
                });
                if !duplicate {
                    adapters.push(fallback);
                }
            }
        }

        for (index, adapter) in adapters.iter().enumerate() {
            let info = adapter.get_info();
            log::info!("device {index}: {} ({:?})", info.name, info.backend);
        }

        Ok(Self::from_adapters(adapters, config))
    }

    /// Builds a directory over adapters the caller already holds.
    pub fn from_adapters(adapters: Vec<wgpu::Adapter>, config: WgpuDirectoryConfig) -> Self {
        let devices = adapters.iter().map(|_| DeviceSlot::default()).collect();
        Self {
            adapters,
            config,
            state: Mutex::new(WgpuState {
                devices,
                queues: HashMap::new(),
                next_queue: 1,
            }),
        }
    }

    /// Installs the process-wide directory. Returns `false` if one is
    /// already installed.
    pub fn install_shared(directory: Arc<Self>) -> bool {
        SHARED.set(directory)
    }

    /// Returns the process-wide directory, if installed.
    pub fn shared() -> Option<Arc<Self>> {
        SHARED.try_get().cloned()
    }

    /// Adapter backing `device`.
    pub fn adapter(&self, device: u32) -> Option<&wgpu::Adapter> {
        self.adapters.get(device as usize)
    }

    fn open_device(&self, device: u32) -> Result<(wgpu::Device, wgpu::Queue), DirectoryError> {
        let adapter = self
            .adapters
            .get(device as usize)
            .ok_or(DirectoryError::NoSuchDevice(device))?;

        let label = format!("{} device {device}", self.config.label);
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some(label.as_str()),
            required_features: self.config.required_features,
            required_limits: self.config.required_limits.clone(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: self.config.memory_hints.clone(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|err| DirectoryError::DeviceRefused {
            device,
            reason: err.to_string(),
        })
    }

    fn lookup(&self, queue: &WgpuQueue) -> Result<(), DirectoryError> {
        if self.state.lock().queues.contains_key(&queue.id) {
            Ok(())
        } else {
            Err(DirectoryError::UnknownQueue)
        }
    }
}

impl ResourceDirectory for WgpuDirectory {
    type Queue = WgpuQueue;

    fn device_count(&self) -> u32 {
        self.adapters.len() as u32
    }

    fn acquire_device(&self, consumer: ConsumerId, device: u32) -> Result<(), DirectoryError> {
        let needs_open = self.state.lock().slot_mut(device)?.open.is_none();

        // Opening blocks on the driver; keep the lock out of it.
        let opened = if needs_open {
            Some(self.open_device(device)?)
        } else {
            None
        };

        let mut state = self.state.lock();
        let slot = state.slot_mut(device)?;
        if slot.open.is_none() {
            slot.open = opened;
            log::debug!("opened wgpu device {device}");
        }
        slot.consumers.insert(consumer);
        Ok(())
    }

    fn release_device(&self, consumer: ConsumerId, device: u32) {
        let mut state = self.state.lock();
        if let Ok(slot) = state.slot_mut(device) {
            slot.consumers.remove(&consumer);
        }
        state.close_if_idle(device);
    }

    fn acquire_queue(&self, consumer: ConsumerId, device: u32) -> Result<WgpuQueue, DirectoryError> {
        let mut state = self.state.lock();
        let slot = state.slot_mut(device)?;
        if !slot.consumers.contains(&consumer) {
            return Err(DirectoryError::NotRegistered { consumer, device });
        }
        let (gpu, queue) = slot.open.clone().ok_or_else(|| DirectoryError::QueueRefused {
            device,
            reason: "device is not open".to_string(),
        })?;

        let id = state.next_queue;
        state.next_queue += 1;
        state.queues.insert(
            id,
            QueueSlot {
                device,
                holders: BTreeSet::from([consumer]),
            },
        );

        Ok(WgpuQueue {
            id,
            device_index: device,
            device: gpu,
            queue,
        })
    }

    fn adopt_queue(
        &self,
        consumer: ConsumerId,
        queue: &WgpuQueue,
        device: u32,
    ) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        if !state.slot_mut(device)?.consumers.contains(&consumer) {
            return Err(DirectoryError::NotRegistered { consumer, device });
        }
        match state.queues.get_mut(&queue.id) {
            Some(slot) if slot.device == device => {
                slot.holders.insert(consumer);
                Ok(())
            }
            _ => Err(DirectoryError::UnknownQueue),
        }
    }

    fn release_queue(&self, consumer: ConsumerId, queue: &WgpuQueue, device: u32) {
        let mut state = self.state.lock();
        let retired = match state.queues.get_mut(&queue.id) {
            Some(slot) => {
                slot.holders.remove(&consumer);
                slot.holders.is_empty()
            }
            None => return,
        };
        if !retired {
            return;
        }

        state.queues.remove(&queue.id);
        if let Ok(slot) = state.slot_mut(device) {
            if slot.active == Some(queue.id) {
                slot.active = None;
            }
        }
        state.close_if_idle(device);
    }

    fn synchronize_queue(&self, queue: &WgpuQueue) -> Result<(), DirectoryError> {
        self.lookup(queue)?;

        let done = Arc::new(AtomicBool::new(false));
        let signal = Arc::clone(&done);
        queue
            .queue
            .on_submitted_work_done(move || signal.store(true, Ordering::Release));

        queue
            .device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|err| DirectoryError::Backend(err.to_string()))?;

        if done.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DirectoryError::Backend(
                "device went idle before submitted work was reported done".to_string(),
            ))
        }
    }

    fn reserve_queue(&self, queue: &WgpuQueue) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        let device = state
            .queues
            .get(&queue.id)
            .map(|q| q.device)
            .ok_or(DirectoryError::UnknownQueue)?;
        state.slot_mut(device)?.active = Some(queue.id);
        Ok(())
    }
}
