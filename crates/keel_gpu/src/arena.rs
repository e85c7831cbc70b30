//! Buffer arenas
//!
//! An arena owns one large backing buffer and a virtual range allocator that
//! carves it into sub-ranges. Arenas never shrink or grow; when one runs out
//! of contiguous space the pool falls back to a sibling or creates a new one.
//!
//! All mutation goes through the per-arena lock. Two threads allocating from
//! different arenas never contend; allocation from the same arena serializes.

use std::ops::BitOr;
use std::sync::Mutex;

use keel_alloc::{RangeAlloc, Span};

use crate::device::GpuBuffer;
use crate::lock;

/// Stable arena identity. Ids are assigned by the pool, start at 1, and are
/// never reused within a pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaId(pub(crate) u64);

impl ArenaId {
    /// The zeroed id carried by freed handles.
    pub const INVALID: Self = Self(0);

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ArenaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the memory behind an arena is used and reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    /// Long-lived GPU-side data: mesh vertex/index/storage contents.
    DeviceLocal,
    /// CPU-written, GPU-read data that changes occasionally.
    HostVisible,
    /// Per-frame ring data (uniforms, transient tables).
    Streaming,
    /// CPU-side sources for copies into device-local ranges.
    Staging,
}

/// Capability flags an arena's backing buffer must carry.
///
/// A request is compatible with an arena when the arena's flags are a
/// superset of the request's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ArenaFlags(u32);

impl ArenaFlags {
    pub const NONE: Self = Self(0);
    /// Ranges may back shader storage bindings.
    pub const STORAGE: Self = Self(1 << 0);
    /// Ranges may feed indirect draw/dispatch commands.
    pub const INDIRECT: Self = Self(1 << 1);
    /// Ranges may be copied back out (readback).
    pub const COPY_SRC: Self = Self(1 << 2);

    pub fn contains(self, other: ArenaFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ArenaFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

struct ArenaState {
    ranges: RangeAlloc,
    live: u32,
}

/// One backing buffer plus the range allocator that subdivides it.
pub struct Arena<B> {
    id: ArenaId,
    class: MemoryClass,
    flags: ArenaFlags,
    layout_hash: Option<u64>,
    buffer: B,
    state: Mutex<ArenaState>,
}

impl<B: GpuBuffer> Arena<B> {
    pub(crate) fn new(
        id: ArenaId,
        buffer: B,
        class: MemoryClass,
        flags: ArenaFlags,
        layout_hash: Option<u64>,
        grain: u64,
    ) -> Self {
        let capacity = buffer.byte_size();
        Self {
            id,
            class,
            flags,
            layout_hash,
            buffer,
            state: Mutex::new(ArenaState { ranges: RangeAlloc::with_grain(capacity, grain), live: 0 }),
        }
    }

    /// Allocate an aligned sub-range. `None` means the arena lacks contiguous
    /// free space; the caller falls back to another arena rather than
    /// retrying here.
    pub fn allocate(&self, size: u64, align: u64) -> Option<Span> {
        let mut state = lock(&self.state);
        let Some(span) = state.ranges.allocate(size, align) else {
            tracing::debug!(
                "arena {}: allocation of {} bytes (align {}) failed, {} of {} bytes free",
                self.id,
                size,
                align,
                state.ranges.available(),
                state.ranges.capacity()
            );
            return None;
        };
        state.live += 1;
        tracing::trace!(
            "arena {}: allocated {} bytes at {} (align {})",
            self.id,
            span.size,
            span.offset,
            align
        );
        Some(span)
    }

    /// Return a sub-range. Offsets that were never handed out by this arena
    /// are a logged no-op.
    pub fn free(&self, offset: u64) -> bool {
        let mut state = lock(&self.state);
        if state.ranges.free(offset) {
            state.live -= 1;
            true
        } else {
            tracing::warn!("arena {}: free of unknown range at offset {} ignored", self.id, offset);
            false
        }
    }

    /// Drop every live range at once. Used by pool teardown paths; any
    /// outstanding handles into this arena become dangling, so this logs
    /// when live allocations remain.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        if state.live > 0 {
            tracing::warn!("arena {}: reset with {} live allocations", self.id, state.live);
        }
        state.ranges.reset();
        state.live = 0;
    }

    /// Usage class must match exactly; required flags must be a subset of
    /// ours; vertex arenas additionally match on layout hash.
    pub fn is_compatible(
        &self,
        class: MemoryClass,
        flags: ArenaFlags,
        layout_hash: Option<u64>,
    ) -> bool {
        self.class == class && self.flags.contains(flags) && self.layout_hash == layout_hash
    }

    /// Best-effort free-byte count for arena selection. Another thread may
    /// invalidate it immediately; the pool treats a subsequent allocation
    /// failure as the real answer.
    pub fn available_bytes(&self) -> u64 {
        lock(&self.state).ranges.available()
    }

    pub fn largest_free(&self) -> u64 {
        lock(&self.state).ranges.largest_free()
    }

    pub fn live_allocations(&self) -> u32 {
        lock(&self.state).live
    }

    pub fn capacity(&self) -> u64 {
        lock(&self.state).ranges.capacity()
    }

    pub fn id(&self) -> ArenaId {
        self.id
    }

    pub fn class(&self) -> MemoryClass {
        self.class
    }

    pub fn flags(&self) -> ArenaFlags {
        self.flags
    }

    pub fn layout_hash(&self) -> Option<u64> {
        self.layout_hash
    }

    /// The backing buffer, for binding at draw/dispatch time. Writes into it
    /// must stay within ranges granted by this arena.
    pub fn buffer(&self) -> &B {
        &self.buffer
    }
}
