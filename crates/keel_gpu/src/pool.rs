//! Arena pool
//!
//! The pool is the registry of arenas, keyed by compatibility signature
//! (usage class, capability flags, vertex layout hash). A request either
//! lands in an existing arena from its signature bucket or triggers creation
//! of a new one sized by the growth heuristic.
//!
//! The registry sits behind one pool-wide lock; individual arenas carry their
//! own. Lock order is always pool then arena, so allocation from two
//! different arenas only contends on the short registry scan.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use keel_alloc::align_up;

use crate::arena::{Arena, ArenaFlags, ArenaId, MemoryClass};
use crate::device::{BufferDesc, GpuDevice};
use crate::error::GpuAllocError;
use crate::handle::BufferAllocation;
use crate::lock;
use crate::vertex::VertexLayout;

const MIB: u64 = 1024 * 1024;

/// Pool sizing knobs. Most callers keep the defaults.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Size of a fresh arena when the request doesn't force more.
    pub default_arena_size: u64,
    /// Cap for heuristic growth. Oversized requests still get an arena big
    /// enough to hold them.
    pub max_arena_size: u64,
    /// Block granularity of every arena's range allocator.
    pub grain: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_arena_size: 64 * MIB,
            max_arena_size: 256 * MIB,
            grain: 256,
        }
    }
}

/// One allocation request against the pool.
#[derive(Debug, Clone)]
pub struct AllocRequest {
    pub size: u64,
    pub align: u64,
    pub class: MemoryClass,
    pub flags: ArenaFlags,
    pub layout: Option<VertexLayout>,
}

impl AllocRequest {
    /// Vertex data in the given layout.
    pub fn vertex(size: u64, layout: &VertexLayout) -> Self {
        Self {
            size,
            align: 4,
            class: MemoryClass::DeviceLocal,
            flags: ArenaFlags::NONE,
            layout: Some(layout.clone()),
        }
    }

    /// Index data.
    pub fn index(size: u64) -> Self {
        Self {
            size,
            align: 4,
            class: MemoryClass::DeviceLocal,
            flags: ArenaFlags::NONE,
            layout: None,
        }
    }

    /// Shader-addressable storage data.
    pub fn storage(size: u64) -> Self {
        Self {
            size,
            align: 256,
            class: MemoryClass::DeviceLocal,
            flags: ArenaFlags::STORAGE,
            layout: None,
        }
    }

    /// Staging space for upload sources.
    pub fn staging(size: u64) -> Self {
        Self {
            size,
            align: 4,
            class: MemoryClass::Staging,
            flags: ArenaFlags::NONE,
            layout: None,
        }
    }

    pub fn with_align(mut self, align: u64) -> Self {
        self.align = align;
        self
    }

    pub fn with_flags(mut self, flags: ArenaFlags) -> Self {
        self.flags = flags;
        self
    }

    fn key(&self) -> PoolKey {
        PoolKey {
            class: self.class,
            flags: self.flags,
            layout_hash: self.layout.as_ref().map(VertexLayout::hash64),
        }
    }
}

/// Compatibility signature an arena is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    class: MemoryClass,
    flags: ArenaFlags,
    layout_hash: Option<u64>,
}

struct Registry<B> {
    next_id: u64,
    arenas: HashMap<ArenaId, Arc<Arena<B>>>,
    buckets: HashMap<PoolKey, Vec<ArenaId>>,
}

pub(crate) struct PoolShared<D: GpuDevice> {
    pub(crate) device: D,
    config: PoolConfig,
    registry: Mutex<Registry<D::Buffer>>,
}

impl<D: GpuDevice> PoolShared<D> {
    pub(crate) fn arena(&self, id: ArenaId) -> Option<Arc<Arena<D::Buffer>>> {
        lock(&self.registry).arenas.get(&id).cloned()
    }

    /// Return a range to its arena; called by handles on free/drop.
    pub(crate) fn free_range(&self, id: ArenaId, offset: u64) {
        match self.arena(id) {
            Some(arena) => {
                arena.free(offset);
            }
            None => {
                tracing::warn!("free for unknown arena {} ignored", id);
            }
        }
    }
}

/// Process-wide registry of arenas, handed around by the graphics bootstrap.
///
/// Cloning is cheap and shares the same registry.
pub struct ArenaPool<D: GpuDevice> {
    shared: Arc<PoolShared<D>>,
}

impl<D: GpuDevice> Clone for ArenaPool<D> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<D: GpuDevice> ArenaPool<D> {
    pub fn new(device: D) -> Self {
        Self::with_config(device, PoolConfig::default())
    }

    pub fn with_config(device: D, config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                device,
                config,
                registry: Mutex::new(Registry {
                    next_id: 1,
                    arenas: HashMap::new(),
                    buckets: HashMap::new(),
                }),
            }),
        }
    }

    /// Find or create a compatible arena and allocate from it.
    ///
    /// Capacity exhaustion in existing arenas is handled internally by
    /// creating a new arena; an `Err` means the request itself is malformed
    /// or the device refused the backing buffer.
    pub fn allocate(&self, request: &AllocRequest) -> Result<BufferAllocation<D>, GpuAllocError> {
        if request.size == 0 {
            return Err(GpuAllocError::InvalidRequest("zero-size allocation".into()));
        }
        if !request.align.is_power_of_two() {
            return Err(GpuAllocError::InvalidRequest(format!(
                "alignment {} is not a power of two",
                request.align
            )));
        }

        let key = request.key();
        let layout_hash = key.layout_hash;

        // Fast path: snapshot the signature bucket and try its arenas outside
        // the registry lock, so two threads can fill different arenas at the
        // same time. `available_bytes` is advisory; a failed allocate just
        // moves on to the next candidate.
        let candidates = self.bucket_arenas(&key);
        if let Some(handle) = self.try_candidates(&candidates, request, layout_hash) {
            return Ok(handle);
        }

        let mut registry = lock(&self.shared.registry);

        // Another thread may have registered a fitting arena while we were
        // unlocked; the bucket only ever appends, so retry just the suffix.
        let late: Vec<Arc<Arena<D::Buffer>>> = registry
            .buckets
            .get(&key)
            .map(|ids| {
                ids.iter()
                    .skip(candidates.len())
                    .filter_map(|id| registry.arenas.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        if let Some(handle) = self.try_candidates(&late, request, layout_hash) {
            return Ok(handle);
        }

        // No existing arena fits: create one sized by the growth heuristic.
        let id = ArenaId(registry.next_id);
        let bytes = arena_size_for(&self.shared.config, request.size, request.align);
        let desc = BufferDesc {
            label: format!("keel-arena-{}", id),
            size: bytes,
            class: request.class,
            flags: request.flags,
        };
        let buffer = self.shared.device.create_buffer(&desc).map_err(|err| {
            tracing::error!(
                "arena {} creation failed ({} bytes, {:?}): {}",
                id,
                bytes,
                request.class,
                err
            );
            err
        })?;
        registry.next_id += 1;

        let arena = Arc::new(Arena::new(
            id,
            buffer,
            request.class,
            request.flags,
            layout_hash,
            self.shared.config.grain,
        ));
        tracing::info!(
            "arena {} created: {} MiB, {:?}, layout {:?}",
            id,
            bytes / MIB,
            request.class,
            layout_hash
        );
        registry.arenas.insert(id, arena.clone());
        registry.buckets.entry(key).or_default().push(id);
        drop(registry);

        // Sized for the request above, so this succeeds short of a logic bug.
        let span = arena.allocate(request.size, request.align).ok_or_else(|| {
            GpuAllocError::ArenaExhausted {
                arena: id.raw(),
                requested: request.size,
                available: arena.available_bytes(),
            }
        })?;
        Ok(BufferAllocation::new(Arc::downgrade(&self.shared), id, span))
    }

    /// Snapshot the arenas currently registered under `key`, in bucket order.
    fn bucket_arenas(&self, key: &PoolKey) -> Vec<Arc<Arena<D::Buffer>>> {
        let registry = lock(&self.shared.registry);
        registry
            .buckets
            .get(key)
            .map(|ids| ids.iter().filter_map(|id| registry.arenas.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Try each candidate arena in turn, outside the registry lock.
    fn try_candidates(
        &self,
        candidates: &[Arc<Arena<D::Buffer>>],
        request: &AllocRequest,
        layout_hash: Option<u64>,
    ) -> Option<BufferAllocation<D>> {
        for arena in candidates {
            if !arena.is_compatible(request.class, request.flags, layout_hash) {
                continue;
            }
            if arena.available_bytes() < request.size {
                continue;
            }
            if let Some(span) = arena.allocate(request.size, request.align) {
                return Some(BufferAllocation::new(
                    Arc::downgrade(&self.shared),
                    arena.id(),
                    span,
                ));
            }
        }
        None
    }

    /// Tear down every bucket whose arenas all have zero live allocations.
    ///
    /// Nothing is released automatically on free: an idle arena keeps its
    /// buffer so churny load patterns don't oscillate between create and
    /// destroy. Returns the number of arenas released.
    pub fn release_unused(&self) -> usize {
        let mut registry = lock(&self.shared.registry);
        let Registry { arenas, buckets, .. } = &mut *registry;
        let mut released = 0;
        buckets.retain(|key, ids| {
            let idle = ids
                .iter()
                .all(|id| arenas.get(id).map_or(true, |a| a.live_allocations() == 0));
            if idle {
                for id in ids.iter() {
                    if arenas.remove(id).is_some() {
                        tracing::info!("arena {} released ({:?})", id, key.class);
                        released += 1;
                    }
                }
            }
            !idle
        });
        released
    }

    /// Number of live arenas across all buckets.
    pub fn arena_count(&self) -> usize {
        lock(&self.shared.registry).arenas.len()
    }

    /// Look up an arena by id, e.g. to bind its buffer for drawing.
    pub fn arena(&self, id: ArenaId) -> Option<Arc<Arena<D::Buffer>>> {
        self.shared.arena(id)
    }

    pub fn device(&self) -> &D {
        &self.shared.device
    }
}

/// Growth heuristic for a fresh arena.
///
/// Start from the default size, double-up for requests above half of it,
/// clamp to the cap, and finally make sure the arena can actually hold the
/// request (plus alignment slack) that is about to be carved from it.
fn arena_size_for(config: &PoolConfig, size: u64, align: u64) -> u64 {
    let mut bytes = size.max(config.default_arena_size);
    if size > config.default_arena_size / 2 {
        bytes = (size * 2).max(config.default_arena_size);
    }
    bytes = bytes.min(config.max_arena_size);
    let slack = if align > config.grain { align } else { 0 };
    bytes = bytes.max(size + slack);
    align_up(bytes, config.grain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::NullDevice;

    fn pool() -> ArenaPool<NullDevice> {
        ArenaPool::new(NullDevice::new())
    }

    #[test]
    fn growth_heuristic_sizing() {
        let config = PoolConfig::default();
        // Small requests get the default arena.
        assert_eq!(arena_size_for(&config, 1 * MIB, 4), 64 * MIB);
        assert_eq!(arena_size_for(&config, 32 * MIB, 4), 64 * MIB);
        // Above half the default, grow to twice the request.
        assert_eq!(arena_size_for(&config, 33 * MIB, 4), 66 * MIB);
        assert_eq!(arena_size_for(&config, 100 * MIB, 4), 200 * MIB);
        // Clamped to the cap.
        assert_eq!(arena_size_for(&config, 130 * MIB, 4), 256 * MIB);
        // Requests beyond the cap still fit.
        assert_eq!(arena_size_for(&config, 300 * MIB, 4), 300 * MIB);
        // Large alignments reserve slack for the padded path.
        assert_eq!(arena_size_for(&config, 300 * MIB, 4096), 300 * MIB + 4096);
    }

    #[test]
    fn requests_with_same_signature_share_an_arena() {
        let pool = pool();
        let a = pool.allocate(&AllocRequest::index(1 * MIB)).unwrap();
        let b = pool.allocate(&AllocRequest::index(1 * MIB)).unwrap();
        assert_eq!(a.arena_id(), b.arena_id());
        assert_eq!(pool.arena_count(), 1);
    }

    #[test]
    fn incompatible_requests_get_separate_arenas() {
        let pool = pool();
        let layout_a = VertexLayout::new(24).with_attr(0, wgpu::VertexFormat::Float32x3, 0);
        let layout_b = VertexLayout::new(32).with_attr(0, wgpu::VertexFormat::Float32x4, 0);

        let va = pool.allocate(&AllocRequest::vertex(1 * MIB, &layout_a)).unwrap();
        let vb = pool.allocate(&AllocRequest::vertex(1 * MIB, &layout_b)).unwrap();
        let st = pool.allocate(&AllocRequest::storage(1 * MIB)).unwrap();
        let up = pool.allocate(&AllocRequest::staging(1 * MIB)).unwrap();

        let ids = [va.arena_id(), vb.arena_id(), st.arena_id(), up.arena_id()];
        for i in 0..ids.len() {
            for j in i + 1..ids.len() {
                assert_ne!(ids[i], ids[j]);
            }
        }
        assert_eq!(pool.arena_count(), 4);
    }

    #[test]
    fn exhausted_bucket_grows_a_second_arena() {
        let pool = pool();
        // Two 20 MiB ranges fill a 64 MiB arena (32 MiB size classes); the
        // third forces a sibling arena under the same signature.
        let a = pool.allocate(&AllocRequest::index(20 * MIB)).unwrap();
        let b = pool.allocate(&AllocRequest::index(20 * MIB)).unwrap();
        assert_eq!(a.arena_id(), b.arena_id());
        let c = pool.allocate(&AllocRequest::index(20 * MIB)).unwrap();
        assert_ne!(c.arena_id(), a.arena_id());
        assert_eq!(pool.arena_count(), 2);
    }

    #[test]
    fn freed_space_is_found_before_growing() {
        let pool = pool();
        let a = pool.allocate(&AllocRequest::index(20 * MIB)).unwrap();
        let _b = pool.allocate(&AllocRequest::index(20 * MIB)).unwrap();
        drop(a);
        // The freed 20 MiB is reused instead of creating a new arena.
        let c = pool.allocate(&AllocRequest::index(20 * MIB)).unwrap();
        assert_eq!(pool.arena_count(), 1);
        assert_eq!(c.arena_id(), _b.arena_id());
    }

    #[test]
    fn oversized_request_creates_dedicated_arena() {
        let pool = pool();
        let big = pool.allocate(&AllocRequest::index(300 * MIB)).unwrap();
        assert_eq!(big.size(), 300 * MIB);
        let arena = pool.arena(big.arena_id()).unwrap();
        assert!(arena.capacity() >= 300 * MIB);
    }

    #[test]
    fn creation_failure_is_fatal_and_clean() {
        // Device refuses anything above 1 MiB.
        let pool = ArenaPool::new(NullDevice::with_max_buffer_size(1 * MIB));
        let err = pool.allocate(&AllocRequest::index(8 * MIB)).unwrap_err();
        assert!(matches!(err, GpuAllocError::BufferCreation { .. }));
        // The failed arena was never registered.
        assert_eq!(pool.arena_count(), 0);
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let pool = pool();
        assert!(matches!(
            pool.allocate(&AllocRequest::index(0)),
            Err(GpuAllocError::InvalidRequest(_))
        ));
        assert!(matches!(
            pool.allocate(&AllocRequest::index(1024).with_align(100)),
            Err(GpuAllocError::InvalidRequest(_))
        ));
    }

    #[test]
    fn release_unused_is_bucket_level() {
        let pool = pool();
        let a = pool.allocate(&AllocRequest::index(1 * MIB)).unwrap();
        let b = pool.allocate(&AllocRequest::staging(1 * MIB)).unwrap();
        assert_eq!(pool.arena_count(), 2);

        drop(b);
        // The staging bucket is idle; the index bucket still has `a` live.
        assert_eq!(pool.release_unused(), 1);
        assert_eq!(pool.arena_count(), 1);
        assert!(pool.arena(a.arena_id()).is_some());

        drop(a);
        assert_eq!(pool.release_unused(), 1);
        assert_eq!(pool.arena_count(), 0);
    }

    #[test]
    fn idle_arena_survives_free_without_explicit_release() {
        let pool = pool();
        let a = pool.allocate(&AllocRequest::index(1 * MIB)).unwrap();
        let id = a.arena_id();
        drop(a);
        // Zero live handles, but no automatic teardown.
        assert_eq!(pool.arena_count(), 1);
        assert!(pool.arena(id).is_some());
    }

    #[test]
    fn concurrent_allocations_from_two_threads() {
        let pool = pool();
        let layout = VertexLayout::new(16).with_attr(0, wgpu::VertexFormat::Float32x4, 0);
        let mut workers = Vec::new();
        for _ in 0..2 {
            let pool = pool.clone();
            let layout = layout.clone();
            workers.push(std::thread::spawn(move || {
                let mut handles = Vec::new();
                for _ in 0..64 {
                    handles.push(pool.allocate(&AllocRequest::vertex(64 * 1024, &layout)).unwrap());
                }
                // Ranges from the same arena must be disjoint.
                for (i, a) in handles.iter().enumerate() {
                    for b in handles.iter().skip(i + 1) {
                        if a.arena_id() == b.arena_id() {
                            let disjoint = a.offset() + a.size() <= b.offset()
                                || b.offset() + b.size() <= a.offset();
                            assert!(disjoint);
                        }
                    }
                }
                handles
            }));
        }
        let all: Vec<_> = workers.into_iter().flat_map(|w| w.join().unwrap()).collect();
        drop(all);
        assert!(pool.release_unused() >= 1);
    }
}
