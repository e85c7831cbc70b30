//! Error types for the GPU resource layer

use thiserror::Error;

/// Failures surfaced by arenas, pools, handles, and bindless tables.
///
/// Construction failures are fatal for the object being built; capacity
/// exhaustion inside healthy objects is reported as `None` by the allocation
/// methods themselves and never as an error here.
#[derive(Debug, Error)]
pub enum GpuAllocError {
    #[error("backing buffer creation failed for '{label}': {reason}")]
    BufferCreation { label: String, reason: String },

    #[error("invalid allocation request: {0}")]
    InvalidRequest(String),

    #[error("arena {arena} exhausted: requested {requested} bytes, {available} available")]
    ArenaExhausted {
        arena: u64,
        requested: u64,
        available: u64,
    },

    #[error("allocation handle is no longer valid")]
    StaleHandle,

    #[error("allocator pool has been dropped")]
    PoolGone,

    #[error("write of {len} bytes at offset {offset} exceeds allocation of {size} bytes")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("device does not support {0}")]
    Unsupported(&'static str),
}
