//! Probe the active adapter, build an arena pool plus unified bindless
//! tables against it, and print what the device gave us.
//!
//! Run with `cargo run -p keel_gpu --example probe_bindless`.

use anyhow::{anyhow, Result};
use keel_gpu::{
    AllocRequest, ArenaPool, BindingKind, BindingPlan, TableDesc, UnifiedTables, VertexLayout,
    WgpuDevice,
};

const BINDLESS_FEATURES: wgpu::Features = wgpu::Features::TEXTURE_BINDING_ARRAY
    .union(wgpu::Features::BUFFER_BINDING_ARRAY)
    .union(wgpu::Features::STORAGE_RESOURCE_BINDING_ARRAY)
    .union(wgpu::Features::PARTIALLY_BOUND_BINDING_ARRAY)
    .union(wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING);

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: None,
    }))
    .ok_or_else(|| anyhow!("no compatible adapter found"))?;
    println!("adapter: {}", adapter.get_info().name);

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("keel-probe"),
            required_features: adapter.features() & BINDLESS_FEATURES,
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
        },
        None,
    ))?;

    let gpu = WgpuDevice::new(device, queue);
    println!("caps: {:#?}", gpu.caps());

    // Carve a mesh out of a shared vertex arena and upload into it.
    let pool = ArenaPool::new(gpu.clone());
    let layout = VertexLayout::new(32)
        .with_attr(0, wgpu::VertexFormat::Float32x3, 0)
        .with_attr(1, wgpu::VertexFormat::Float32x3, 12)
        .with_attr(2, wgpu::VertexFormat::Float32x2, 24);
    let vertices = pool.allocate(&AllocRequest::vertex(3 * 32, &layout))?;
    vertices.write(&[0.0f32; 24], 0)?;
    let indices = pool.allocate(&AllocRequest::index(3 * 4))?;
    indices.write(&[0u32, 1, 2], 0)?;
    println!(
        "mesh in arena {}: vertices at {}, indices at {} ({} arena(s))",
        vertices.arena_id(),
        vertices.offset(),
        indices.offset(),
        pool.arena_count()
    );

    // Compose one bindless binding set if the device can bind arrays.
    let descs = [
        TableDesc { kind: BindingKind::SampledTexture, capacity: 1024, binding: 0 },
        TableDesc { kind: BindingKind::StorageBuffer, capacity: 256, binding: 1 },
    ];
    match BindingPlan::resolve(gpu.caps(), &descs) {
        Ok(plan) => {
            let tables = UnifiedTables::create(&gpu, plan)?;
            let textures = tables.textures().expect("planned above");
            let shadow_slots = textures
                .create_sub_allocation(16, "shadow-maps")
                .expect("fresh table has a free run");
            println!(
                "bindless tables ready: {} texture slots ({} reserved for shadows)",
                textures.capacity(),
                shadow_slots.len()
            );
            let _bind_group = tables.bind_group(gpu.device());
        }
        Err(err) => println!("bindless unavailable on this device: {}", err),
    }

    Ok(())
}
