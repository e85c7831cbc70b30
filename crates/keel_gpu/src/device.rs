//! The device seam
//!
//! Arenas and pools only need three things from the graphics device: a
//! capability snapshot, a way to create backing buffers, and a way to push
//! bytes into them. Those three are the [`GpuDevice`] trait; [`WgpuDevice`]
//! is the production implementation over `wgpu`, and tests drive the same
//! code through a null device that records writes.

use crate::arena::{ArenaFlags, MemoryClass};
use crate::caps::DeviceCaps;
use crate::error::GpuAllocError;

/// Description of one arena backing buffer.
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub class: MemoryClass,
    pub flags: ArenaFlags,
}

/// A backing buffer created through [`GpuDevice::create_buffer`].
pub trait GpuBuffer: Send + Sync + 'static {
    fn byte_size(&self) -> u64;
}

/// Buffer factory plus upload mechanism, as seen by the allocation layer.
pub trait GpuDevice: Send + Sync + 'static {
    type Buffer: GpuBuffer;

    fn caps(&self) -> &DeviceCaps;

    /// Create a backing buffer. Failure here is fatal for the arena being
    /// built; the caller must not retry with the same descriptor.
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer, GpuAllocError>;

    /// Copy `data` into `buffer` at `offset`. Callers guarantee the write is
    /// in-bounds; GPU-side reuse hazards are theirs to manage.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);
}

impl GpuBuffer for wgpu::Buffer {
    fn byte_size(&self) -> u64 {
        self.size()
    }
}

/// Production device: a `wgpu` device/queue pair plus its capability
/// snapshot. Uploads go through `Queue::write_buffer`, which stages the copy
/// internally.
#[derive(Debug, Clone)]
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: DeviceCaps,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let caps = DeviceCaps::from_device(&device);
        Self { device, queue, caps }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn usage_for(&self, class: MemoryClass, flags: ArenaFlags) -> wgpu::BufferUsages {
        let mut usage = match class {
            MemoryClass::DeviceLocal => {
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST
            }
            MemoryClass::HostVisible => {
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST
            }
            MemoryClass::Streaming => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            MemoryClass::Staging => wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        };
        if flags.contains(ArenaFlags::STORAGE) {
            usage |= wgpu::BufferUsages::STORAGE;
        }
        if flags.contains(ArenaFlags::INDIRECT) {
            usage |= wgpu::BufferUsages::INDIRECT;
        }
        if flags.contains(ArenaFlags::COPY_SRC) {
            usage |= wgpu::BufferUsages::COPY_SRC;
        }
        // MAP_WRITE only combines with other usages when the device allows
        // mappable primary buffers; otherwise uploads stay on the copy path.
        if self.caps.mappable_primary_buffers
            && matches!(class, MemoryClass::HostVisible | MemoryClass::Staging)
        {
            usage |= wgpu::BufferUsages::MAP_WRITE;
        }
        usage
    }
}

impl GpuDevice for WgpuDevice {
    type Buffer = wgpu::Buffer;

    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer, GpuAllocError> {
        if desc.size == 0 || desc.size > self.caps.max_buffer_size {
            return Err(GpuAllocError::BufferCreation {
                label: desc.label.clone(),
                reason: format!(
                    "{} bytes outside device range (max {})",
                    desc.size, self.caps.max_buffer_size
                ),
            });
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: desc.size,
            usage: self.usage_for(desc.class, desc.flags),
            mapped_at_creation: false,
        });
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        debug_assert_eq!(offset % wgpu::COPY_BUFFER_ALIGNMENT, 0);
        self.queue.write_buffer(buffer, offset, data);
    }
}
