//! Fixed-capacity bindless table

use std::sync::{Arc, Mutex};

use keel_alloc::SlotSet;

use crate::bindless::sub::BindlessSubAllocation;
use crate::lock;

/// Descriptor table of `capacity` slots, generic over the resource it binds
/// (texture views, buffer ranges — anything cheap to clone).
///
/// Cloning the table shares the same slots; all operations go through an
/// internal lock, so background loaders may register resources while the
/// render thread composes bind groups.
pub struct BindlessTable<R> {
    shared: Arc<TableShared<R>>,
}

impl<R> Clone for BindlessTable<R> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

struct TableShared<R> {
    label: String,
    capacity: u32,
    state: Mutex<TableState<R>>,
}

struct TableState<R> {
    slots: SlotSet,
    entries: Vec<R>,
    default: R,
    /// Runs handed to sub-allocations. Reserved slots are claimed in `slots`
    /// and owned by their sub-allocation until process end.
    reserved: Vec<(u32, u32)>,
    revision: u64,
}

impl<R> TableState<R> {
    fn is_reserved(&self, index: u32) -> bool {
        self.reserved.iter().any(|&(start, len)| index >= start && index < start + len)
    }
}

/// Entries copied out for bind-group composition, tagged with the revision
/// they were taken at.
pub struct TableSnapshot<R> {
    pub entries: Vec<R>,
    pub revision: u64,
}

impl<R: Clone> BindlessTable<R> {
    /// Create a table with every slot bound to `default`.
    pub fn new(capacity: u32, default: R, label: impl Into<String>) -> Self {
        let label = label.into();
        tracing::info!("bindless table '{}' created with {} slots", label, capacity);
        Self {
            shared: Arc::new(TableShared {
                label,
                capacity,
                state: Mutex::new(TableState {
                    slots: SlotSet::new(capacity),
                    entries: vec![default.clone(); capacity as usize],
                    default,
                    reserved: Vec::new(),
                    revision: 0,
                }),
            }),
        }
    }

    /// Claim the first unused slot and bind `resource` to it. Returns the
    /// slot index, or `None` when the table is full — capacity is fixed, the
    /// table never grows.
    pub fn allocate_single(&self, resource: R) -> Option<u32> {
        let mut state = lock(&self.shared.state);
        match state.slots.claim_next() {
            Some(index) => {
                state.entries[index as usize] = resource;
                state.revision += 1;
                tracing::trace!("bindless table '{}': slot {} allocated", self.shared.label, index);
                Some(index)
            }
            None => {
                tracing::warn!(
                    "bindless table '{}' is full ({} slots)",
                    self.shared.label,
                    self.shared.capacity
                );
                None
            }
        }
    }

    /// Rebind an allocated slot. `None` resets it to the default resource —
    /// a slot is never left stale. Out-of-range or unallocated indices are a
    /// logged no-op.
    pub fn update(&self, index: u32, resource: Option<R>) {
        if index >= self.shared.capacity {
            tracing::warn!(
                "bindless table '{}': update of out-of-range slot {} ignored",
                self.shared.label,
                index
            );
            return;
        }
        let mut state = lock(&self.shared.state);
        if state.is_reserved(index) {
            tracing::warn!(
                "bindless table '{}': slot {} belongs to a sub-allocation, update ignored",
                self.shared.label,
                index
            );
            return;
        }
        if !state.slots.is_used(index) {
            tracing::warn!(
                "bindless table '{}': update of unallocated slot {} ignored",
                self.shared.label,
                index
            );
            return;
        }
        let value = resource.unwrap_or_else(|| state.default.clone());
        state.entries[index as usize] = value;
        state.revision += 1;
    }

    /// Release a slot: rebind it to the default resource and make it the
    /// next candidate for allocation (freshly freed slots are reused first,
    /// keeping the working set compact).
    pub fn free(&self, index: u32) {
        if index >= self.shared.capacity {
            tracing::warn!(
                "bindless table '{}': free of out-of-range slot {} ignored",
                self.shared.label,
                index
            );
            return;
        }
        let mut state = lock(&self.shared.state);
        if state.is_reserved(index) {
            tracing::warn!(
                "bindless table '{}': slot {} belongs to a sub-allocation, free ignored",
                self.shared.label,
                index
            );
            return;
        }
        if !state.slots.release(index) {
            tracing::warn!(
                "bindless table '{}': free of unallocated slot {} ignored",
                self.shared.label,
                index
            );
            return;
        }
        let default = state.default.clone();
        state.entries[index as usize] = default;
        state.revision += 1;
    }

    /// Reserve the first run of `len` contiguous unused slots for an
    /// independent sub-allocator. Fails when no run is long enough; no
    /// defragmentation is attempted.
    pub fn create_sub_allocation(
        &self,
        len: u32,
        label: impl Into<String>,
    ) -> Option<BindlessSubAllocation<R>> {
        let label = label.into();
        let mut state = lock(&self.shared.state);
        let Some(start) = state.slots.find_free_run(len) else {
            tracing::warn!(
                "bindless table '{}': no run of {} contiguous free slots for '{}'",
                self.shared.label,
                len,
                label
            );
            return None;
        };
        state.slots.claim_run(start, len);
        state.reserved.push((start, len));
        drop(state);
        tracing::info!(
            "bindless table '{}': slots [{}, {}) reserved for '{}'",
            self.shared.label,
            start,
            start + len,
            label
        );
        Some(BindlessSubAllocation::new(self.clone(), start, len, label))
    }

    /// Write an entry inside a reserved run. `None` resets to the default.
    /// Only sub-allocations call this; the run stays claimed either way.
    pub(crate) fn write_reserved(&self, index: u32, resource: Option<R>) {
        let mut state = lock(&self.shared.state);
        debug_assert!(state.is_reserved(index));
        let value = resource.unwrap_or_else(|| state.default.clone());
        state.entries[index as usize] = value;
        state.revision += 1;
    }

    /// Copy of the entry at `index`, if in range.
    pub fn entry(&self, index: u32) -> Option<R> {
        let state = lock(&self.shared.state);
        state.entries.get(index as usize).cloned()
    }

    /// Copy all entries out for bind-group composition.
    pub fn snapshot(&self) -> TableSnapshot<R> {
        let state = lock(&self.shared.state);
        TableSnapshot { entries: state.entries.clone(), revision: state.revision }
    }

    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }

    pub fn free_slots(&self) -> u32 {
        lock(&self.shared.state).slots.free_count()
    }

    /// Bumped on every entry write; the composer rebuilds bind groups when it
    /// moves.
    pub fn revision(&self) -> u64 {
        lock(&self.shared.state).revision
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }
}
