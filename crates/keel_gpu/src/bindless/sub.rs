//! Bindless sub-allocation
//!
//! A contiguous partition of a parent table handed to an independent
//! subsystem (shadow atlases, probe grids) so it manages its own slot
//! lifecycle without touching the parent's free list. Indices handed out are
//! absolute parent-space indices; bookkeeping is local to the reserved run.
//!
//! Dropping the sub-allocation resets every still-bound slot to the parent's
//! default resource, so no table entry outlives the subsystem that owns it.
//! The run itself stays reserved in the parent for the life of the process.

use std::sync::Mutex;

use keel_alloc::SlotSet;

use crate::bindless::table::BindlessTable;
use crate::lock;

/// Independent allocator over `[start, start + len)` of a parent table.
pub struct BindlessSubAllocation<R: Clone> {
    parent: BindlessTable<R>,
    start: u32,
    len: u32,
    label: String,
    local: Mutex<SlotSet>,
}

impl<R: Clone> BindlessSubAllocation<R> {
    pub(crate) fn new(parent: BindlessTable<R>, start: u32, len: u32, label: String) -> Self {
        Self { parent, start, len, label, local: Mutex::new(SlotSet::new(len)) }
    }

    /// Claim a slot within the reserved run and bind `resource` to it.
    /// The returned index is absolute (parent-space).
    pub fn allocate(&self, resource: R) -> Option<u32> {
        let mut local = lock(&self.local);
        match local.claim_next() {
            Some(slot) => {
                let index = self.start + slot;
                self.parent.write_reserved(index, Some(resource));
                Some(index)
            }
            None => {
                tracing::warn!("sub-allocation '{}' is full ({} slots)", self.label, self.len);
                None
            }
        }
    }

    /// Rebind an allocated slot by absolute index. `None` resets it to the
    /// parent's default resource.
    pub fn update(&self, index: u32, resource: Option<R>) {
        if !self.contains(index) {
            tracing::warn!(
                "sub-allocation '{}': index {} outside [{}, {}), update ignored",
                self.label,
                index,
                self.start,
                self.start + self.len
            );
            return;
        }
        let local = lock(&self.local);
        if !local.is_used(index - self.start) {
            tracing::warn!(
                "sub-allocation '{}': update of unallocated slot {} ignored",
                self.label,
                index
            );
            return;
        }
        self.parent.write_reserved(index, resource);
    }

    /// Release a slot by absolute index, rebinding it to the parent default.
    /// The underlying parent slot stays reserved for this sub-allocation.
    pub fn free(&self, index: u32) {
        if !self.contains(index) {
            tracing::warn!(
                "sub-allocation '{}': index {} outside [{}, {}), free ignored",
                self.label,
                index,
                self.start,
                self.start + self.len
            );
            return;
        }
        let mut local = lock(&self.local);
        if !local.release(index - self.start) {
            tracing::warn!(
                "sub-allocation '{}': free of unallocated slot {} ignored",
                self.label,
                index
            );
            return;
        }
        self.parent.write_reserved(index, None);
    }

    pub fn contains(&self, index: u32) -> bool {
        index >= self.start && index < self.start + self.len
    }

    /// First absolute index of the reserved run.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Length of the reserved run.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.local).free_count() == self.len
    }

    pub fn free_slots(&self) -> u32 {
        lock(&self.local).free_count()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<R: Clone> Drop for BindlessSubAllocation<R> {
    fn drop(&mut self) {
        let local = lock(&self.local);
        let mut reset = 0;
        for slot in 0..self.len {
            if local.is_used(slot) {
                self.parent.write_reserved(self.start + slot, None);
                reset += 1;
            }
        }
        if reset > 0 {
            tracing::debug!(
                "sub-allocation '{}' dropped: {} slots reset to default",
                self.label,
                reset
            );
        }
    }
}
