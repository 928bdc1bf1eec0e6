use thiserror::Error;

use super::DirectoryError;

/// Why a handle operation did not complete.
///
/// None of these are fatal. The handle is always left either unchanged or
/// fully unbound, and the same message has already gone out through the
/// diagnostic channel by the time the caller sees the error.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum BindError {
    #[error("device {device} does not exist ({count} available)")]
    InvalidDeviceIndex { device: u32, count: u32 },

    #[error("device {device} cannot be retrieved")]
    DeviceUnavailable {
        device: u32,
        #[source]
        source: DirectoryError,
    },

    #[error("no queue could be retrieved for device {device}")]
    QueueUnavailable {
        device: u32,
        #[source]
        source: DirectoryError,
    },

    #[error("no device is bound")]
    NotBound,

    #[error("reserving the queue failed")]
    ReserveFailed(#[source] DirectoryError),

    #[error("synchronizing the queue failed")]
    SynchronizeFailed(#[source] DirectoryError),

    #[error("handles are served by different directories")]
    ForeignDirectory,
}
