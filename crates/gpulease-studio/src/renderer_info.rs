use std::sync::Arc;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use gpulease_engine::device::{
    BindError, Binding, DataPolicy, DeviceHooks, GpuHandle, MemoryDirectory, QueueHandle,
    ResourceDirectory, WgpuDirectory, WgpuQueue,
};

pub const MAX_CLIP_PLANES: usize = 6;

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Renderer/camera/shading parameters as laid out for the GPU.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct RendererUniform {
    pub view_to_voxels: [f32; 16],
    pub world_to_voxels: [f32; 16],
    /// Plane equations `(a, b, c, d)`, first `plane_count` are active.
    pub clip_planes: [[f32; 4]; MAX_CLIP_PLANES],
    pub plane_count: u32,
    pub gradient_shading: f32,
    pub _pad: [f32; 2],
}

impl Default for RendererUniform {
    fn default() -> Self {
        Self {
            view_to_voxels: IDENTITY,
            world_to_voxels: IDENTITY,
            clip_planes: [[0.0; 4]; MAX_CLIP_PLANES],
            plane_count: 0,
            gradient_shading: 0.0,
            _pad: [0.0; 2],
        }
    }
}

/// GPU-resident side of the renderer information.
///
/// The CPU copy in `uniform` is the staging area: on a migration with
/// `PreserveData` it survives and is re-uploaded on the new device, with
/// `Discard` it is reset.
#[derive(Debug, Default)]
pub struct RendererInfo {
    pub uniform: RendererUniform,
    buffer: Option<wgpu::Buffer>,
    resident_on: Option<u32>,
    rebuilds: u32,
}

impl RendererInfo {
    pub fn resident_on(&self) -> Option<u32> {
        self.resident_on
    }

    pub fn rebuilds(&self) -> u32 {
        self.rebuilds
    }

    fn teardown(&mut self, device: u32, policy: DataPolicy) {
        log::debug!("renderer info leaving device {device} ({policy:?})");
        self.buffer = None;
        self.resident_on = None;
        if !policy.preserves_data() {
            self.uniform = RendererUniform::default();
        }
    }

    fn rebuild(&mut self, device: u32) {
        self.resident_on = Some(device);
        self.rebuilds += 1;
    }
}

impl DeviceHooks<WgpuQueue> for RendererInfo {
    fn reinitialize(&mut self, binding: &Binding<WgpuQueue>, _policy: DataPolicy) {
        let buffer = binding
            .queue
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("renderer info uniform"),
                contents: bytemuck::bytes_of(&self.uniform),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        self.buffer = Some(buffer);
        self.rebuild(binding.device);
    }

    fn deinitialize(&mut self, binding: &Binding<WgpuQueue>, policy: DataPolicy) {
        self.teardown(binding.device, policy);
    }
}

impl DeviceHooks<QueueHandle> for RendererInfo {
    fn reinitialize(&mut self, binding: &Binding<QueueHandle>, _policy: DataPolicy) {
        self.rebuild(binding.device);
    }

    fn deinitialize(&mut self, binding: &Binding<QueueHandle>, policy: DataPolicy) {
        self.teardown(binding.device, policy);
    }
}

/// Owning component: renderer information plus its device lease.
pub struct RendererInfoHandler<D: ResourceDirectory> {
    gpu: GpuHandle<D>,
    info: RendererInfo,
}

impl<D> RendererInfoHandler<D>
where
    D: ResourceDirectory,
    RendererInfo: DeviceHooks<D::Queue>,
{
    pub fn new(directory: Arc<D>, device: u32) -> Self {
        let gpu = GpuHandle::new(directory, device);
        let mut info = RendererInfo::default();
        // Initial setup is the owner's job; construction runs no hooks.
        if let Some(binding) = gpu.binding() {
            info.reinitialize(binding, DataPolicy::Discard);
        }
        Self { gpu, info }
    }

    pub fn gpu(&self) -> &GpuHandle<D> {
        &self.gpu
    }

    pub fn info(&self) -> &RendererInfo {
        &self.info
    }

    pub fn set_device(&mut self, device: u32, policy: DataPolicy) -> Result<(), BindError> {
        self.gpu.set_device(device, policy, &mut self.info)
    }

    pub fn replicate_from(&mut self, other: &Self, policy: DataPolicy) -> Result<(), BindError> {
        self.gpu.replicate_from(&other.gpu, policy, &mut self.info)
    }

    /// Sets the shading strength, clamped to `[0, 1]`.
    pub fn set_gradient_shading(&mut self, darkness: f32) {
        self.info.uniform.gradient_shading = darkness.clamp(0.0, 1.0);
    }

    pub fn set_view_to_voxels(&mut self, m: [f32; 16]) {
        self.info.uniform.view_to_voxels = m;
    }

    pub fn set_world_to_voxels(&mut self, m: [f32; 16]) {
        self.info.uniform.world_to_voxels = m;
    }

    /// Stores up to [`MAX_CLIP_PLANES`] planes; extra planes are ignored.
    pub fn set_clip_planes(&mut self, planes: &[[f32; 4]]) {
        let n = planes.len().min(MAX_CLIP_PLANES);
        self.info.uniform.clip_planes = [[0.0; 4]; MAX_CLIP_PLANES];
        self.info.uniform.clip_planes[..n].copy_from_slice(&planes[..n]);
        self.info.uniform.plane_count = n as u32;
    }
}

impl RendererInfoHandler<WgpuDirectory> {
    /// Pushes the CPU copy to the bound device.
    pub fn update(&self) -> Result<()> {
        let (Some(queue), Some(buffer)) = (self.gpu.queue(), self.info.buffer.as_ref()) else {
            return Err(BindError::NotBound.into());
        };
        self.gpu.reserve_gpu()?;
        queue
            .queue()
            .write_buffer(buffer, 0, bytemuck::bytes_of(&self.info.uniform));
        queue.submit(std::iter::empty());
        Ok(())
    }
}

impl RendererInfoHandler<MemoryDirectory> {
    /// Records one simulated upload on the bound queue.
    pub fn update(&self) -> Result<()> {
        let Some(queue) = self.gpu.queue() else {
            return Err(BindError::NotBound.into());
        };
        self.gpu.reserve_gpu()?;
        self.gpu
            .directory()
            .submit(*queue)
            .with_context(|| format!("failed to submit renderer info on {queue}"))
    }
}
