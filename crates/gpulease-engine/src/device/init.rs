/// Construction parameters for a [`GpuHandle`](super::GpuHandle).
#[derive(Debug, Clone, Default)]
pub struct HandleConfig {
    /// Device bound at construction.
    pub preferred_device: u32,

    /// Optional name shown in lifecycle traces and diagnostics.
    pub label: Option<String>,
}

impl HandleConfig {
    pub fn on_device(device: u32) -> Self {
        Self {
            preferred_device: device,
            label: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Initialization parameters for [`WgpuDirectory`](super::WgpuDirectory).
///
/// Keep this structure stable and minimal. Add configuration flags only when a
/// concrete platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct WgpuDirectoryConfig {
    /// Backends the instance may use.
    pub backends: wgpu::Backends,

    /// Power preference for the primary adapter (device 0).
    pub power_preference: wgpu::PowerPreference,

    /// Also expose the software fallback adapter, when it differs from the
    /// primary one, as an additional device.
    pub include_fallback_adapter: bool,

    /// Required wgpu features for every device the directory opens.
    ///
    /// Favor an empty set for portability unless a feature is strictly necessary.
    pub required_features: wgpu::Features,

    /// Limits requested from each adapter.
    pub required_limits: wgpu::Limits,

    /// Allocation strategy hint passed to each device.
    pub memory_hints: wgpu::MemoryHints,

    /// Debug label prefix for opened devices.
    pub label: String,
}

impl Default for WgpuDirectoryConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            include_fallback_adapter: true,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            label: "gpulease".to_string(),
        }
    }
}
