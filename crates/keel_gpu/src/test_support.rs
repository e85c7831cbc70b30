//! Device stand-ins for unit tests
//!
//! The pool, arena, and handle logic is exercised without a physical adapter:
//! `NullDevice` satisfies [`GpuDevice`](crate::device::GpuDevice) with
//! size-only buffers that record every write for assertions.

use std::sync::{Arc, Mutex};

use crate::caps::DeviceCaps;
use crate::device::{BufferDesc, GpuBuffer, GpuDevice};
use crate::error::GpuAllocError;
use crate::lock;

/// Size-only buffer that records `(offset, len)` for every write.
#[derive(Debug, Clone)]
pub struct NullBuffer {
    size: u64,
    writes: Arc<Mutex<Vec<(u64, usize)>>>,
}

impl NullBuffer {
    pub fn new(size: u64) -> Self {
        Self { size, writes: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn writes(&self) -> Vec<(u64, usize)> {
        lock(&self.writes).clone()
    }
}

impl GpuBuffer for NullBuffer {
    fn byte_size(&self) -> u64 {
        self.size
    }
}

/// Deviceless [`GpuDevice`] implementation for tests.
pub struct NullDevice {
    caps: DeviceCaps,
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            caps: DeviceCaps {
                texture_binding_arrays: true,
                buffer_binding_arrays: true,
                storage_resource_arrays: true,
                partially_bound: true,
                non_uniform_indexing: true,
                max_buffer_size: 1 << 40,
                ..DeviceCaps::default()
            },
        }
    }

    /// A device that refuses buffers above `max`, to exercise construction
    /// failure paths.
    pub fn with_max_buffer_size(max: u64) -> Self {
        let mut device = Self::new();
        device.caps.max_buffer_size = max;
        device
    }
}

impl GpuDevice for NullDevice {
    type Buffer = NullBuffer;

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
        Ok(NullBuffer::new(desc.size))
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        lock(&buffer.writes).push((offset, data.len()));
    }
}
