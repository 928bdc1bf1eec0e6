use std::sync::Arc;

use anyhow::{Context, Result};
use gpulease_engine::device::{
    DataPolicy, MemoryDirectory, ResourceDirectory, WgpuDirectory, WgpuDirectoryConfig,
};
use gpulease_engine::logging::{init_logging, LoggingConfig};

mod renderer_info;

use renderer_info::{RendererInfo, RendererInfoHandler};

/// Which directory the studio drives.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum BackendChoice {
    /// wgpu when an adapter is available, otherwise the memory pool.
    Auto,
    Memory,
    Wgpu,
}

#[derive(Debug, Clone)]
struct StudioConfig {
    backend: BackendChoice,
    /// Size of the simulated pool.
    memory_devices: u32,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            memory_devices: 2,
        }
    }
}

impl StudioConfig {
    /// Defaults, overridden by `GPULEASE_BACKEND` and `GPULEASE_DEVICES`.
    fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(backend) = std::env::var("GPULEASE_BACKEND") {
            config.backend = match backend.to_ascii_lowercase().as_str() {
                "auto" => BackendChoice::Auto,
                "memory" => BackendChoice::Memory,
                "wgpu" => BackendChoice::Wgpu,
                other => anyhow::bail!("unknown GPULEASE_BACKEND {other:?} (auto|memory|wgpu)"),
            };
        }

        if let Ok(devices) = std::env::var("GPULEASE_DEVICES") {
            config.memory_devices = devices
                .parse()
                .with_context(|| format!("GPULEASE_DEVICES must be a count, got {devices:?}"))?;
            anyhow::ensure!(config.memory_devices > 0, "GPULEASE_DEVICES must be at least 1");
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());
    let config = StudioConfig::from_env()?;

    let wgpu_directory = match config.backend {
        BackendChoice::Memory => None,
        BackendChoice::Wgpu => Some(open_wgpu()?),
        BackendChoice::Auto => match open_wgpu() {
            Ok(directory) => Some(directory),
            Err(err) => {
                log::warn!("{err:#}; falling back to the simulated pool");
                None
            }
        },
    };

    match wgpu_directory {
        Some(directory) => {
            let directory = Arc::new(directory);
            if !WgpuDirectory::install_shared(Arc::clone(&directory)) {
                log::warn!("a shared directory was already installed");
            }
            session(directory, |h| h.update())
        }
        None => {
            let directory = Arc::new(MemoryDirectory::new(config.memory_devices));
            session(directory, |h| h.update())
        }
    }
}

fn open_wgpu() -> Result<WgpuDirectory> {
    pollster::block_on(WgpuDirectory::new(WgpuDirectoryConfig::default()))
        .context("failed to open wgpu directory")
}

/// Walks one owner through construct, upload, migrate, replicate and drain.
fn session<D, U>(directory: Arc<D>, update: U) -> Result<()>
where
    D: ResourceDirectory,
    RendererInfo: gpulease_engine::device::DeviceHooks<D::Queue>,
    U: Fn(&RendererInfoHandler<D>) -> Result<()>,
{
    let count = directory.device_count();
    anyhow::ensure!(count > 0, "directory exposes no devices");
    let last = count - 1;
    log::info!("{count} device(s) available");

    let mut volume = RendererInfoHandler::new(Arc::clone(&directory), 0);
    anyhow::ensure!(volume.gpu().is_bound(), "could not bind device 0");

    volume.set_gradient_shading(0.35);
    volume.set_world_to_voxels(scale(0.5));
    volume.set_view_to_voxels(scale(2.0));
    volume.set_clip_planes(&[
        [1.0, 0.0, 0.0, 0.0],
        [-1.0, 0.0, 0.0, 128.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, -1.0, 0.0, 128.0],
    ]);
    update(&volume)?;
    volume.gpu().synchronize_queue()?;
    log::info!("volume uploaded on device {:?}", volume.gpu().device());

    volume.set_device(last, DataPolicy::PreserveData)?;
    update(&volume)?;
    log::info!(
        "volume migrated to device {:?} (rebuilt {} time(s), shading {})",
        volume.info().resident_on(),
        volume.info().rebuilds(),
        volume.info().uniform.gradient_shading,
    );

    let mut overlay = RendererInfoHandler::new(Arc::clone(&directory), 0);
    overlay.replicate_from(&volume, DataPolicy::Discard)?;
    update(&overlay)?;
    log::info!(
        "overlay shares the volume queue on device {:?}: {}",
        overlay.gpu().device(),
        overlay.gpu().queue() == volume.gpu().queue(),
    );

    overlay.gpu().synchronize_queue()?;
    drop(overlay);
    drop(volume);
    log::info!("session finished");
    Ok(())
}

fn scale(s: f32) -> [f32; 16] {
    [
        s, 0.0, 0.0, 0.0, //
        0.0, s, 0.0, 0.0, //
        0.0, 0.0, s, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}
