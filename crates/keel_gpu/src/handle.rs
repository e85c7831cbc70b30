//! Allocation handles
//!
//! A handle is the capability for one sub-range of an arena: `(arena id,
//! offset, size)` plus weak access to the pool that owns the registry. It
//! returns its range on drop; after an explicit `free` its fields are zeroed
//! and every further operation is rejected.
//!
//! Handles deliberately do not keep their arena alive on their own — the
//! pool's registry is the single owner, and a handle that outlives the pool
//! degrades to an inert value.

use std::sync::{Arc, Weak};

use crate::arena::{Arena, ArenaId};
use crate::device::GpuDevice;
use crate::error::GpuAllocError;
use crate::pool::PoolShared;

/// Owning reference to one allocated sub-range.
pub struct BufferAllocation<D: GpuDevice> {
    pool: Weak<PoolShared<D>>,
    arena: ArenaId,
    offset: u64,
    size: u64,
}

impl<D: GpuDevice> BufferAllocation<D> {
    pub(crate) fn new(pool: Weak<PoolShared<D>>, arena: ArenaId, span: keel_alloc::Span) -> Self {
        Self { pool, arena, offset: span.offset, size: span.size }
    }

    /// Arena this range lives in; `ArenaId::INVALID` once freed.
    pub fn arena_id(&self) -> ArenaId {
        self.arena
    }

    /// Absolute byte offset within the arena's backing buffer.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size in bytes of the granted range.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// False once the handle has been freed.
    pub fn is_valid(&self) -> bool {
        self.size != 0
    }

    /// Return the range to its arena and invalidate the handle.
    ///
    /// Dropping the handle does the same; calling this twice is a no-op.
    pub fn free(&mut self) {
        if !self.is_valid() {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.free_range(self.arena, self.offset);
        }
        self.arena = ArenaId::INVALID;
        self.offset = 0;
        self.size = 0;
    }

    /// Copy raw bytes into the range at `offset` (relative to the range
    /// start). The caller must not free or rewrite the range while in-flight
    /// GPU work still reads it.
    pub fn write_bytes(&self, data: &[u8], offset: u64) -> Result<(), GpuAllocError> {
        if !self.is_valid() {
            tracing::warn!("write through freed allocation handle rejected");
            return Err(GpuAllocError::StaleHandle);
        }
        let len = data.len() as u64;
        let end = offset.checked_add(len).ok_or(GpuAllocError::OutOfBounds {
            offset,
            len,
            size: self.size,
        })?;
        if end > self.size {
            return Err(GpuAllocError::OutOfBounds { offset, len, size: self.size });
        }
        let pool = self.pool.upgrade().ok_or(GpuAllocError::PoolGone)?;
        let arena = pool.arena(self.arena).ok_or(GpuAllocError::StaleHandle)?;
        pool.device.write_buffer(arena.buffer(), self.offset + offset, data);
        Ok(())
    }

    /// Copy a typed slice into the range at `byte_offset`.
    pub fn write<T: bytemuck::NoUninit>(
        &self,
        data: &[T],
        byte_offset: u64,
    ) -> Result<(), GpuAllocError> {
        self.write_bytes(bytemuck::cast_slice(data), byte_offset)
    }

    /// The owning arena, e.g. to bind its buffer for drawing. `None` once the
    /// handle or the pool is gone.
    pub fn arena(&self) -> Option<Arc<Arena<D::Buffer>>> {
        if !self.is_valid() {
            return None;
        }
        self.pool.upgrade()?.arena(self.arena)
    }
}

impl<D: GpuDevice> Drop for BufferAllocation<D> {
    fn drop(&mut self) {
        self.free();
    }
}

impl<D: GpuDevice> std::fmt::Debug for BufferAllocation<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferAllocation")
            .field("arena", &self.arena)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{AllocRequest, ArenaPool};
    use crate::test_support::NullDevice;

    fn pool() -> ArenaPool<NullDevice> {
        ArenaPool::new(NullDevice::new())
    }

    #[test]
    fn free_zeroes_the_handle() {
        let pool = pool();
        let mut handle = pool.allocate(&AllocRequest::index(4096)).unwrap();
        assert!(handle.is_valid());
        let arena = handle.arena().unwrap();
        assert_eq!(arena.live_allocations(), 1);

        handle.free();
        assert!(!handle.is_valid());
        assert_eq!(handle.arena_id(), ArenaId::INVALID);
        assert_eq!(handle.offset(), 0);
        assert_eq!(handle.size(), 0);
        assert_eq!(arena.live_allocations(), 0);

        // Second free is a no-op.
        handle.free();
        assert_eq!(arena.live_allocations(), 0);
    }

    #[test]
    fn drop_returns_the_range() {
        let pool = pool();
        let handle = pool.allocate(&AllocRequest::index(4096)).unwrap();
        let arena = handle.arena().unwrap();
        drop(handle);
        assert_eq!(arena.live_allocations(), 0);
        assert_eq!(arena.available_bytes(), arena.capacity());
    }

    #[test]
    fn writes_are_bounds_checked() {
        let pool = pool();
        let handle = pool.allocate(&AllocRequest::index(4096)).unwrap();

        handle.write_bytes(&[0u8; 4096], 0).unwrap();
        handle.write_bytes(&[0u8; 16], 4080).unwrap();
        assert!(matches!(
            handle.write_bytes(&[0u8; 16], 4081),
            Err(GpuAllocError::OutOfBounds { .. })
        ));
        assert!(matches!(
            handle.write_bytes(&[0u8; 8192], 0),
            Err(GpuAllocError::OutOfBounds { .. })
        ));

        // Writes land at the range's absolute offset in the arena buffer.
        let arena = handle.arena().unwrap();
        let writes = arena.buffer().writes();
        assert_eq!(writes, vec![(handle.offset(), 4096), (handle.offset() + 4080, 16)]);
    }

    #[test]
    fn typed_writes_go_through_bytemuck() {
        let pool = pool();
        let handle = pool.allocate(&AllocRequest::index(1024)).unwrap();
        let indices: [u32; 6] = [0, 1, 2, 2, 1, 3];
        handle.write(&indices, 0).unwrap();
        let arena = handle.arena().unwrap();
        assert_eq!(arena.buffer().writes(), vec![(handle.offset(), 24)]);
    }

    #[test]
    fn freed_handle_rejects_writes() {
        let pool = pool();
        let mut handle = pool.allocate(&AllocRequest::index(1024)).unwrap();
        handle.free();
        assert!(matches!(handle.write_bytes(&[0u8; 4], 0), Err(GpuAllocError::StaleHandle)));
        assert!(handle.arena().is_none());
    }

    #[test]
    fn handle_outliving_pool_is_inert() {
        let pool = pool();
        let mut handle = pool.allocate(&AllocRequest::index(1024)).unwrap();
        drop(pool);
        assert!(matches!(handle.write_bytes(&[0u8; 4], 0), Err(GpuAllocError::PoolGone)));
        handle.free();
        assert!(!handle.is_valid());
    }
}
