use std::fmt::Debug;

use thiserror::Error;

use super::ConsumerId;

/// Failure reported by a [`ResourceDirectory`].
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum DirectoryError {
    #[error("device {0} does not exist")]
    NoSuchDevice(u32),

    #[error("device {device} refused: {reason}")]
    DeviceRefused { device: u32, reason: String },

    #[error("no queue available on device {device}: {reason}")]
    QueueRefused { device: u32, reason: String },

    #[error("queue is not known to this directory")]
    UnknownQueue,

    #[error("{consumer} is not registered on device {device}")]
    NotRegistered { consumer: ConsumerId, device: u32 },

    #[error("backend error: {0}")]
    Backend(String),
}

/// Shared arbiter over the pool of devices and their execution queues.
///
/// Implementations serialize their own bookkeeping; handles call into them
/// from whatever thread drives the handle and treat every call as
/// potentially blocking. The directory is the source of truth for queue
/// ownership: a queue may be held by several consumers and only goes away
/// once the last of them releases it.
pub trait ResourceDirectory: Send + Sync {
    /// Opaque queue handle issued by this directory.
    type Queue: Clone + PartialEq + Debug;

    /// Number of usable devices. Valid indices are `0..device_count()`.
    fn device_count(&self) -> u32;

    /// Registers `consumer` against `device`.
    ///
    /// Several consumers may register against the same device.
    fn acquire_device(&self, consumer: ConsumerId, device: u32) -> Result<(), DirectoryError>;

    /// Deregisters `consumer` from `device`.
    fn release_device(&self, consumer: ConsumerId, device: u32);

    /// Issues a queue on `device` to `consumer`. The queue may be shared.
    fn acquire_queue(
        &self,
        consumer: ConsumerId,
        device: u32,
    ) -> Result<Self::Queue, DirectoryError>;

    /// Records `consumer` as an additional holder of an already issued queue.
    fn adopt_queue(
        &self,
        consumer: ConsumerId,
        queue: &Self::Queue,
        device: u32,
    ) -> Result<(), DirectoryError>;

    /// Drops `consumer`'s reference to `queue`.
    fn release_queue(&self, consumer: ConsumerId, queue: &Self::Queue, device: u32);

    /// Blocks until all work submitted on `queue` has completed.
    fn synchronize_queue(&self, queue: &Self::Queue) -> Result<(), DirectoryError>;

    /// Marks `queue` as the active target for subsequent submissions.
    fn reserve_queue(&self, queue: &Self::Queue) -> Result<(), DirectoryError>;
}
