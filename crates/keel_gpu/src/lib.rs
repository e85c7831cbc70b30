//! Keel GPU Resource Layer
//!
//! GPU-resident resource allocation for the renderer:
//! - Buffer arenas: large backing buffers subdivided into aligned ranges for
//!   mesh vertex/index/storage data, pooled by compatibility signature
//! - Bindless tables: fixed-capacity descriptor arrays addressed by plain
//!   integer index from shaders, with contiguous sub-allocations for
//!   independent subsystems
//! - Unified binding composition: one bind group multiplexing the per-kind
//!   tables, sized and flagged from device capability queries
//!
//! The graphics bootstrap constructs an [`ArenaPool`] and [`UnifiedTables`]
//! and hands them to consumers; there is no global state. GPU-side timing is
//! out of scope: callers must not free or rewrite a range while in-flight
//! work still reads it.

pub mod arena;
pub mod bindless;
pub mod caps;
pub mod device;
pub mod error;
pub mod handle;
pub mod pool;
pub mod vertex;

#[cfg(test)]
pub(crate) mod test_support;

pub use wgpu;

pub use arena::{Arena, ArenaFlags, ArenaId, MemoryClass};
pub use bindless::{
    BindingKind, BindingPlan, BindlessSubAllocation, BindlessTable, BufferRange, PlannedBinding,
    TableDesc, TableSnapshot, UnifiedTables,
};
pub use caps::DeviceCaps;
pub use device::{BufferDesc, GpuBuffer, GpuDevice, WgpuDevice};
pub use error::GpuAllocError;
pub use handle::BufferAllocation;
pub use pool::{AllocRequest, ArenaPool, PoolConfig};
pub use vertex::{VertexAttr, VertexLayout};

/// Allocation handles against the production device.
pub type GpuBufferAllocation = BufferAllocation<WgpuDevice>;
/// The arena pool against the production device.
pub type GpuArenaPool = ArenaPool<WgpuDevice>;

/// Lock a mutex, continuing with the inner data even if a previous holder
/// panicked. Allocator state stays consistent under the lock, so poisoning
/// carries no extra meaning here.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
