//! Device capability snapshot
//!
//! Everything the allocation layer needs to know about the active device is
//! captured once into a plain struct, so the rest of the subsystem (and its
//! tests) never has to hold a live `wgpu::Device` just to make sizing and
//! layout decisions.

/// Capability and limit snapshot taken from the active device.
#[derive(Debug, Clone)]
pub struct DeviceCaps {
    /// Texture arrays may be bound with a runtime-sized `count`.
    pub texture_binding_arrays: bool,
    /// Buffer bindings may be arrays.
    pub buffer_binding_arrays: bool,
    /// Storage buffers specifically may appear in binding arrays.
    pub storage_resource_arrays: bool,
    /// Binding arrays may be bound with fewer entries than their declared
    /// capacity.
    pub partially_bound: bool,
    /// Shaders may index binding arrays with non-uniform values.
    pub non_uniform_indexing: bool,
    /// Any buffer may carry `MAP_READ`/`MAP_WRITE` alongside other usages.
    pub mappable_primary_buffers: bool,

    pub max_sampled_textures: u32,
    pub max_storage_buffers: u32,
    pub max_uniform_buffers: u32,
    pub max_buffer_size: u64,
    pub min_uniform_offset_align: u32,
    pub min_storage_offset_align: u32,
}

impl DeviceCaps {
    /// Snapshot the capabilities of a live device.
    pub fn from_device(device: &wgpu::Device) -> Self {
        Self::from_features_limits(device.features(), &device.limits())
    }

    pub fn from_features_limits(features: wgpu::Features, limits: &wgpu::Limits) -> Self {
        Self {
            texture_binding_arrays: features.contains(wgpu::Features::TEXTURE_BINDING_ARRAY),
            buffer_binding_arrays: features.contains(wgpu::Features::BUFFER_BINDING_ARRAY),
            storage_resource_arrays: features
                .contains(wgpu::Features::STORAGE_RESOURCE_BINDING_ARRAY),
            partially_bound: features.contains(wgpu::Features::PARTIALLY_BOUND_BINDING_ARRAY),
            non_uniform_indexing: features.contains(
                wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING,
            ),
            mappable_primary_buffers: features.contains(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS),
            max_sampled_textures: limits.max_sampled_textures_per_shader_stage,
            max_storage_buffers: limits.max_storage_buffers_per_shader_stage,
            max_uniform_buffers: limits.max_uniform_buffers_per_shader_stage,
            max_buffer_size: limits.max_buffer_size,
            min_uniform_offset_align: limits.min_uniform_buffer_offset_alignment,
            min_storage_offset_align: limits.min_storage_buffer_offset_alignment,
        }
    }
}

impl Default for DeviceCaps {
    /// Conservative baseline: default wgpu limits, no optional features.
    fn default() -> Self {
        let limits = wgpu::Limits::default();
        Self::from_features_limits(wgpu::Features::empty(), &limits)
    }
}
