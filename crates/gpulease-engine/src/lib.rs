//! gpulease engine crate.
//!
//! Leases GPU devices and execution queues to objects that keep state on the
//! GPU, and keeps that state consistent when they move between devices.
//!
//! # Structure
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`device`] | `GpuHandle`, `ResourceDirectory`, `MemoryDirectory`, `WgpuDirectory` |
//! | [`logging`] | `init_logging`, diagnostic sinks and the global display toggle |
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use gpulease_engine::device::{DataPolicy, GpuHandle, MemoryDirectory, NoHooks};
//!
//! let directory = Arc::new(MemoryDirectory::new(2));
//! let mut handle = GpuHandle::new(Arc::clone(&directory), 0);
//! assert_eq!(handle.device(), Some(0));
//!
//! handle.set_device(1, DataPolicy::PreserveData, &mut NoHooks).unwrap();
//! assert_eq!(handle.device(), Some(1));
//! ```

pub mod device;
pub mod logging;
