//! Device/queue leasing.
//!
//! This module is responsible for:
//! - the [`ResourceDirectory`] contract handles use to acquire and return
//!   devices and queues
//! - [`GpuHandle`], the per-object lease with bind/migrate/replicate/drain
//! - two directories: [`MemoryDirectory`] (simulated pool) and
//!   [`WgpuDirectory`] (wgpu adapters)

mod binding;
mod directory;
mod error;
mod gpu;
mod handle;
mod init;
mod memory;

pub use binding::{Binding, ConsumerId, DataPolicy, DeviceHooks, NoHooks};
pub use directory::{DirectoryError, ResourceDirectory};
pub use error::BindError;
pub use gpu::{WgpuDirectory, WgpuQueue};
pub use handle::GpuHandle;
pub use init::{HandleConfig, WgpuDirectoryConfig};
pub use memory::{DirectoryCall, MemoryDirectory, QueueHandle};
