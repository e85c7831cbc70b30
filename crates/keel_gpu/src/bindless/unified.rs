//! Unified binding-table composition
//!
//! Several bindless tables of different resource kinds share one bind group
//! bound once per frame: textures under one binding, storage buffers under
//! another, and so on. Layout resolution is split from resource creation so
//! sizing and capability decisions are testable without a device.

use std::num::NonZeroU32;
use std::sync::Mutex;

use crate::bindless::table::BindlessTable;
use crate::caps::DeviceCaps;
use crate::device::WgpuDevice;
use crate::error::GpuAllocError;
use crate::lock;

/// Resource kinds a unified table can multiplex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    SampledTexture,
    StorageBuffer,
    UniformBuffer,
}

impl BindingKind {
    fn name(self) -> &'static str {
        match self {
            Self::SampledTexture => "sampled texture arrays",
            Self::StorageBuffer => "storage buffer arrays",
            Self::UniformBuffer => "uniform buffer arrays",
        }
    }
}

/// One requested binding: a table of `capacity` resources of `kind` at
/// `binding` within the shared bind group.
#[derive(Debug, Clone, Copy)]
pub struct TableDesc {
    pub kind: BindingKind,
    pub capacity: u32,
    pub binding: u32,
}

/// A [`TableDesc`] after capability resolution.
#[derive(Debug, Clone, Copy)]
pub struct PlannedBinding {
    pub kind: BindingKind,
    /// Requested capacity clamped to the device's per-stage limit.
    pub capacity: u32,
    pub binding: u32,
    /// Whether the device would accept binding fewer than `capacity` entries.
    /// The composer always binds full, default-filled arrays, so this is
    /// advisory for consumers building their own bind groups.
    pub partially_bound: bool,
}

/// Device-validated layout for one unified binding table.
#[derive(Debug, Clone)]
pub struct BindingPlan {
    bindings: Vec<PlannedBinding>,
}

impl BindingPlan {
    /// Resolve the requested tables against the device capabilities.
    ///
    /// Fails when a kind is requested that the device cannot bind as an
    /// array, or when the request list itself is malformed. Capacities above
    /// the device's per-stage limit are clamped with a warning.
    pub fn resolve(caps: &DeviceCaps, descs: &[TableDesc]) -> Result<Self, GpuAllocError> {
        if descs.is_empty() {
            return Err(GpuAllocError::InvalidRequest("no binding tables requested".into()));
        }
        let mut bindings: Vec<PlannedBinding> = Vec::with_capacity(descs.len());
        for desc in descs {
            if desc.capacity == 0 {
                return Err(GpuAllocError::InvalidRequest(format!(
                    "zero capacity for {:?}",
                    desc.kind
                )));
            }
            if bindings.iter().any(|b| b.kind == desc.kind) {
                return Err(GpuAllocError::InvalidRequest(format!(
                    "duplicate table kind {:?}",
                    desc.kind
                )));
            }
            if bindings.iter().any(|b| b.binding == desc.binding) {
                return Err(GpuAllocError::InvalidRequest(format!(
                    "duplicate binding index {}",
                    desc.binding
                )));
            }

            let supported = match desc.kind {
                BindingKind::SampledTexture => caps.texture_binding_arrays,
                BindingKind::StorageBuffer => {
                    caps.buffer_binding_arrays && caps.storage_resource_arrays
                }
                BindingKind::UniformBuffer => caps.buffer_binding_arrays,
            };
            if !supported {
                return Err(GpuAllocError::Unsupported(desc.kind.name()));
            }

            let limit = match desc.kind {
                BindingKind::SampledTexture => caps.max_sampled_textures,
                BindingKind::StorageBuffer => caps.max_storage_buffers,
                BindingKind::UniformBuffer => caps.max_uniform_buffers,
            };
            let capacity = desc.capacity.min(limit);
            if capacity < desc.capacity {
                tracing::warn!(
                    "{:?} table clamped from {} to {} slots by device limits",
                    desc.kind,
                    desc.capacity,
                    capacity
                );
            }

            bindings.push(PlannedBinding {
                kind: desc.kind,
                capacity,
                binding: desc.binding,
                partially_bound: caps.partially_bound,
            });
        }
        Ok(Self { bindings })
    }

    pub fn bindings(&self) -> &[PlannedBinding] {
        &self.bindings
    }

    pub fn capacity_of(&self, kind: BindingKind) -> Option<u32> {
        self.bindings.iter().find(|b| b.kind == kind).map(|b| b.capacity)
    }
}

/// A storage or uniform buffer region bindable through a bindless table.
#[derive(Debug, Clone)]
pub struct BufferRange {
    pub buffer: wgpu::Buffer,
    pub offset: u64,
    pub size: Option<wgpu::BufferSize>,
}

impl BufferRange {
    pub fn whole(buffer: wgpu::Buffer) -> Self {
        Self { buffer, offset: 0, size: None }
    }
}

struct CachedBindGroup {
    bind_group: wgpu::BindGroup,
    revisions: Vec<u64>,
}

/// One bind group multiplexing the per-kind bindless tables.
///
/// Independent subsystems grab their typed table (or a sub-allocation of it)
/// and register resources; the renderer asks for the bind group once per
/// frame and gets a cached one unless some table changed.
pub struct UnifiedTables {
    plan: BindingPlan,
    layout: wgpu::BindGroupLayout,
    textures: Option<BindlessTable<wgpu::TextureView>>,
    storage: Option<BindlessTable<BufferRange>>,
    uniforms: Option<BindlessTable<BufferRange>>,
    cache: Mutex<Option<CachedBindGroup>>,
}

impl UnifiedTables {
    /// Create the shared layout, the placeholder resources, and one
    /// default-filled table per planned binding.
    pub fn create(gpu: &WgpuDevice, plan: BindingPlan) -> Result<Self, GpuAllocError> {
        let device = gpu.device();

        let entries: Vec<wgpu::BindGroupLayoutEntry> =
            plan.bindings().iter().map(layout_entry).collect();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("keel-bindless-layout"),
            entries: &entries,
        });

        let mut textures = None;
        let mut storage = None;
        let mut uniforms = None;
        let needs_buffer = plan
            .bindings()
            .iter()
            .any(|b| matches!(b.kind, BindingKind::StorageBuffer | BindingKind::UniformBuffer));
        let default_buffer = needs_buffer.then(|| placeholder_buffer(device));

        for planned in plan.bindings() {
            match planned.kind {
                BindingKind::SampledTexture => {
                    let view = placeholder_texture_view(device, gpu.queue());
                    textures =
                        Some(BindlessTable::new(planned.capacity, view, "bindless-textures"));
                }
                BindingKind::StorageBuffer => {
                    let default = BufferRange::whole(default_buffer.clone().unwrap_or_else(|| {
                        placeholder_buffer(device)
                    }));
                    storage =
                        Some(BindlessTable::new(planned.capacity, default, "bindless-storage"));
                }
                BindingKind::UniformBuffer => {
                    let default = BufferRange::whole(default_buffer.clone().unwrap_or_else(|| {
                        placeholder_buffer(device)
                    }));
                    uniforms =
                        Some(BindlessTable::new(planned.capacity, default, "bindless-uniforms"));
                }
            }
        }

        Ok(Self { plan, layout, textures, storage, uniforms, cache: Mutex::new(None) })
    }

    pub fn plan(&self) -> &BindingPlan {
        &self.plan
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    /// The sampled-texture table, when one was planned.
    pub fn textures(&self) -> Option<&BindlessTable<wgpu::TextureView>> {
        self.textures.as_ref()
    }

    pub fn storage_buffers(&self) -> Option<&BindlessTable<BufferRange>> {
        self.storage.as_ref()
    }

    pub fn uniform_buffers(&self) -> Option<&BindlessTable<BufferRange>> {
        self.uniforms.as_ref()
    }

    /// The bind group over all tables. Rebuilt only when some table's
    /// revision moved since the last call; otherwise a cheap cached clone.
    pub fn bind_group(&self, device: &wgpu::Device) -> wgpu::BindGroup {
        let mut cache = lock(&self.cache);

        let texture_snapshot = self.textures.as_ref().map(|t| t.snapshot());
        let storage_snapshot = self.storage.as_ref().map(|t| t.snapshot());
        let uniform_snapshot = self.uniforms.as_ref().map(|t| t.snapshot());

        let revisions: Vec<u64> = [
            texture_snapshot.as_ref().map(|s| s.revision),
            storage_snapshot.as_ref().map(|s| s.revision),
            uniform_snapshot.as_ref().map(|s| s.revision),
        ]
        .into_iter()
        .flatten()
        .collect();

        if let Some(cached) = cache.as_ref() {
            if cached.revisions == revisions {
                return cached.bind_group.clone();
            }
        }

        let texture_refs: Vec<&wgpu::TextureView> = texture_snapshot
            .as_ref()
            .map(|s| s.entries.iter().collect())
            .unwrap_or_default();
        let storage_bindings: Vec<wgpu::BufferBinding> = storage_snapshot
            .as_ref()
            .map(|s| s.entries.iter().map(buffer_binding).collect())
            .unwrap_or_default();
        let uniform_bindings: Vec<wgpu::BufferBinding> = uniform_snapshot
            .as_ref()
            .map(|s| s.entries.iter().map(buffer_binding).collect())
            .unwrap_or_default();

        let mut entries: Vec<wgpu::BindGroupEntry> = Vec::new();
        for planned in self.plan.bindings() {
            let resource = match planned.kind {
                BindingKind::SampledTexture => {
                    wgpu::BindingResource::TextureViewArray(&texture_refs)
                }
                BindingKind::StorageBuffer => {
                    wgpu::BindingResource::BufferArray(&storage_bindings)
                }
                BindingKind::UniformBuffer => {
                    wgpu::BindingResource::BufferArray(&uniform_bindings)
                }
            };
            entries.push(wgpu::BindGroupEntry { binding: planned.binding, resource });
        }

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("keel-bindless"),
            layout: &self.layout,
            entries: &entries,
        });
        tracing::trace!("bindless bind group rebuilt ({} bindings)", entries.len());
        *cache = Some(CachedBindGroup { bind_group: bind_group.clone(), revisions });
        bind_group
    }
}

fn layout_entry(planned: &PlannedBinding) -> wgpu::BindGroupLayoutEntry {
    let ty = match planned.kind {
        BindingKind::SampledTexture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingKind::StorageBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingKind::UniformBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
    };
    wgpu::BindGroupLayoutEntry {
        binding: planned.binding,
        visibility: wgpu::ShaderStages::VERTEX
            | wgpu::ShaderStages::FRAGMENT
            | wgpu::ShaderStages::COMPUTE,
        ty,
        count: NonZeroU32::new(planned.capacity),
    }
}

fn buffer_binding(range: &BufferRange) -> wgpu::BufferBinding<'_> {
    wgpu::BufferBinding { buffer: &range.buffer, offset: range.offset, size: range.size }
}

/// 1x1 white texture every unused texture slot resolves to.
fn placeholder_texture_view(device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::TextureView {
    let size = wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("keel-bindless-placeholder"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &[0xFF, 0xFF, 0xFF, 0xFF],
        wgpu::ImageDataLayout { offset: 0, bytes_per_row: Some(4), rows_per_image: None },
        size,
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

/// Small zero-filled buffer every unused buffer slot resolves to. wgpu
/// zero-initializes buffers, so no upload is needed.
fn placeholder_buffer(device: &wgpu::Device) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("keel-bindless-placeholder"),
        size: 256,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::UNIFORM,
        mapped_at_creation: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindless_caps() -> DeviceCaps {
        DeviceCaps {
            texture_binding_arrays: true,
            buffer_binding_arrays: true,
            storage_resource_arrays: true,
            partially_bound: true,
            non_uniform_indexing: true,
            ..DeviceCaps::default()
        }
    }

    fn descs() -> Vec<TableDesc> {
        vec![
            TableDesc { kind: BindingKind::SampledTexture, capacity: 1024, binding: 0 },
            TableDesc { kind: BindingKind::StorageBuffer, capacity: 256, binding: 1 },
            TableDesc { kind: BindingKind::UniformBuffer, capacity: 8, binding: 2 },
        ]
    }

    #[test]
    fn capacities_clamp_to_device_limits() {
        let mut caps = bindless_caps();
        caps.max_sampled_textures = 128;
        caps.max_storage_buffers = 16;
        let plan = BindingPlan::resolve(&caps, &descs()).unwrap();
        assert_eq!(plan.capacity_of(BindingKind::SampledTexture), Some(128));
        assert_eq!(plan.capacity_of(BindingKind::StorageBuffer), Some(16));
        assert_eq!(plan.capacity_of(BindingKind::UniformBuffer), Some(8));
    }

    #[test]
    fn unsupported_kinds_are_rejected() {
        let mut caps = bindless_caps();
        caps.texture_binding_arrays = false;
        assert!(matches!(
            BindingPlan::resolve(&caps, &descs()),
            Err(GpuAllocError::Unsupported(_))
        ));

        let mut caps = bindless_caps();
        caps.storage_resource_arrays = false;
        let only_storage =
            [TableDesc { kind: BindingKind::StorageBuffer, capacity: 16, binding: 0 }];
        assert!(matches!(
            BindingPlan::resolve(&caps, &only_storage),
            Err(GpuAllocError::Unsupported(_))
        ));
    }

    #[test]
    fn duplicate_kinds_and_bindings_are_rejected() {
        let caps = bindless_caps();
        let dup_kind = [
            TableDesc { kind: BindingKind::UniformBuffer, capacity: 8, binding: 0 },
            TableDesc { kind: BindingKind::UniformBuffer, capacity: 8, binding: 1 },
        ];
        assert!(BindingPlan::resolve(&caps, &dup_kind).is_err());

        let dup_binding = [
            TableDesc { kind: BindingKind::UniformBuffer, capacity: 8, binding: 0 },
            TableDesc { kind: BindingKind::StorageBuffer, capacity: 8, binding: 0 },
        ];
        assert!(BindingPlan::resolve(&caps, &dup_binding).is_err());
    }

    #[test]
    fn empty_or_zero_requests_are_rejected() {
        let caps = bindless_caps();
        assert!(BindingPlan::resolve(&caps, &[]).is_err());
        let zero = [TableDesc { kind: BindingKind::UniformBuffer, capacity: 0, binding: 0 }];
        assert!(BindingPlan::resolve(&caps, &zero).is_err());
    }

    #[test]
    fn partially_bound_flag_follows_caps() {
        let mut caps = bindless_caps();
        caps.partially_bound = false;
        let plan = BindingPlan::resolve(&caps, &descs()).unwrap();
        assert!(plan.bindings().iter().all(|b| !b.partially_bound));
    }
}
