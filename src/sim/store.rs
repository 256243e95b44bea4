//! Fixed-capacity object store with O(1) allocate and release
//!
//! All slots are created up front. `release` only queues a handle; the slot is
//! recycled by the next `compact`, which swap-removes it from the live list so
//! live values stay contiguous. Handles carry a generation so a handle never
//! resolves again once its slot has been recycled.
//!
//! Allocation and release take one short internal lock and may be called from
//! worker threads while cells are being processed. Compaction needs `&mut self`
//! and therefore never overlaps grid traversal.

use std::fmt;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// Index + generation pair identifying one allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store {store}: out of free instances (capacity {capacity}), consider increasing the capacity")]
    Exhausted { store: &'static str, capacity: usize },
    #[error("store {store}: double free of {handle}")]
    DoubleFree { store: &'static str, handle: Handle },
    #[error("store {store}: free overrun")]
    FreeOverrun { store: &'static str },
}

/// What allocation does when the store is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExhaustionPolicy {
    /// Report [`StoreError::Exhausted`]
    #[default]
    Fail,
    /// Hand back no handle and carry on
    ReturnNone,
}

/// Development checks run on `release`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreChecks {
    /// Linear scan of the pending-free list for the released handle
    pub double_free: bool,
    /// Reject releases once the pending-free list holds `capacity` handles
    pub free_limits: bool,
}

impl StoreChecks {
    pub const NONE: Self = Self { double_free: false, free_limits: false };
    pub const ALL: Self = Self { double_free: true, free_limits: true };

    #[inline]
    fn check_double_free(self) -> bool {
        self.double_free || cfg!(feature = "store_checks")
    }

    #[inline]
    fn check_free_limits(self) -> bool {
        self.free_limits || cfg!(feature = "store_checks")
    }
}

struct SlotState<T> {
    generation: u32,
    /// Position of this slot in `Lists::live` while allocated
    live_index: u32,
    value: Option<T>,
}

struct Lists {
    /// Stack of recyclable slot indices
    free: Vec<u32>,
    /// Allocated slot indices, contiguous
    live: Vec<u32>,
    /// Released, waiting for `compact`
    pending_free: Vec<Handle>,
    /// Allocated since the last `drain_allocated`
    allocated: Vec<Handle>,
}

pub struct Store<T> {
    name: &'static str,
    capacity: usize,
    checks: StoreChecks,
    slots: Box<[Mutex<SlotState<T>>]>,
    lists: Mutex<Lists>,
}

impl<T> Store<T> {
    /// Create a store with `capacity` preallocated slots.
    ///
    /// Capacity is clamped to `u32::MAX` slots.
    pub fn new(name: &'static str, capacity: usize, checks: StoreChecks) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        let slots = (0..capacity)
            .map(|_| {
                Mutex::new(SlotState {
                    generation: 0,
                    live_index: 0,
                    value: None,
                })
            })
            .collect();

        // Reversed so the lowest index is handed out first
        let free = (0..capacity as u32).rev().collect();

        Self {
            name,
            capacity,
            checks,
            slots,
            lists: Mutex::new(Lists {
                free,
                live: Vec::with_capacity(capacity),
                pending_free: Vec::with_capacity(capacity),
                allocated: Vec::with_capacity(capacity),
            }),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate a slot and construct its value from the new handle.
    ///
    /// `init` runs with the slot locked and must not touch this store.
    pub fn allocate_with(&self, init: impl FnOnce(Handle) -> T) -> Result<Handle, StoreError> {
        self.try_allocate_with(init).ok_or(StoreError::Exhausted {
            store: self.name,
            capacity: self.capacity,
        })
    }

    /// Nullable variant of [`Store::allocate_with`]: `None` when the store is full
    pub fn try_allocate_with(&self, init: impl FnOnce(Handle) -> T) -> Option<Handle> {
        let (handle, mut slot) = {
            let mut lists = self.lists.lock();
            let index = lists.free.pop()?;
            let mut slot = self.slots[index as usize].lock();
            slot.live_index = lists.live.len() as u32;
            lists.live.push(index);
            let handle = Handle::new(index, slot.generation);
            lists.allocated.push(handle);
            (handle, slot)
        };
        slot.value = Some(init(handle));
        Some(handle)
    }

    /// Queue `handle` for destruction at the next [`Store::compact`].
    ///
    /// The value stays reachable through the handle until then.
    pub fn release(&self, handle: Handle) -> Result<(), StoreError> {
        let mut lists = self.lists.lock();

        if self.checks.check_free_limits() && lists.pending_free.len() >= self.capacity {
            return Err(StoreError::FreeOverrun { store: self.name });
        }

        if self.checks.check_double_free() && lists.pending_free.contains(&handle) {
            return Err(StoreError::DoubleFree {
                store: self.name,
                handle,
            });
        }

        lists.pending_free.push(handle);
        Ok(())
    }

    /// Lock the value behind `handle`. `None` for stale or unallocated handles.
    pub fn lock(&self, handle: Handle) -> Option<MappedMutexGuard<'_, T>> {
        let slot = self.slots.get(handle.index() as usize)?.lock();
        if slot.generation != handle.generation() {
            return None;
        }
        MutexGuard::try_map(slot, |s| s.value.as_mut()).ok()
    }

    /// Lock two distinct values, always in slot order so concurrent callers
    /// cannot deadlock on the same pair.
    pub fn lock_pair(
        &self,
        a: Handle,
        b: Handle,
    ) -> Option<(MappedMutexGuard<'_, T>, MappedMutexGuard<'_, T>)> {
        if a.index() == b.index() {
            return None;
        }
        if a.index() < b.index() {
            let first = self.lock(a)?;
            let second = self.lock(b)?;
            Some((first, second))
        } else {
            let second = self.lock(b)?;
            let first = self.lock(a)?;
            Some((first, second))
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index() as usize)?.get_mut();
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    /// True from allocation until the compaction that processes its release
    pub fn is_live(&self, handle: Handle) -> bool {
        self.lock(handle).is_some()
    }

    pub fn live_count(&self) -> usize {
        self.lists.lock().live.len()
    }

    pub fn pending_free_count(&self) -> usize {
        self.lists.lock().pending_free.len()
    }

    /// Visit every live value.
    ///
    /// Works on a copy of the live list, so `f` may allocate or release.
    pub fn for_each(&self, mut f: impl FnMut(Handle, &mut T)) {
        let live = self.lists.lock().live.clone();
        for index in live {
            let mut slot = self.slots[index as usize].lock();
            let handle = Handle::new(index, slot.generation);
            if let Some(value) = slot.value.as_mut() {
                f(handle, value);
            }
        }
    }

    /// Visit every live value without locking
    pub fn for_each_mut(&mut self, mut f: impl FnMut(Handle, &mut T)) {
        let Self { slots, lists, .. } = self;
        for &index in &lists.get_mut().live {
            let slot = slots[index as usize].get_mut();
            let handle = Handle::new(index, slot.generation);
            if let Some(value) = slot.value.as_mut() {
                f(handle, value);
            }
        }
    }

    /// Visit values allocated since the previous call.
    ///
    /// Values already destroyed by a compaction in between are skipped.
    /// Returns the number of values visited.
    pub fn drain_allocated(&mut self, mut f: impl FnMut(Handle, &mut T)) -> usize {
        let Self { slots, lists, .. } = self;
        let mut visited = 0;
        for handle in lists.get_mut().allocated.drain(..) {
            let slot = slots[handle.index() as usize].get_mut();
            if slot.generation != handle.generation() {
                continue;
            }
            if let Some(value) = slot.value.as_mut() {
                f(handle, value);
                visited += 1;
            }
        }
        visited
    }

    /// Destroy every released value.
    ///
    /// For each pending handle: run `teardown`, swap the last live slot into
    /// the freed position of the live list, bump the slot generation, then
    /// drop the value. Live-list order is not stable across a compaction.
    /// Returns the number of values destroyed.
    pub fn compact(&mut self, mut teardown: impl FnMut(Handle, &mut T)) -> usize {
        let Self { slots, lists, .. } = self;
        let lists = lists.get_mut();
        let mut pending = std::mem::take(&mut lists.pending_free);
        let mut freed = 0;

        for &handle in &pending {
            let index = handle.index() as usize;

            let live_index = {
                let slot = slots[index].get_mut();
                if slot.generation != handle.generation() {
                    // released twice without checks, already gone
                    continue;
                }
                let Some(value) = slot.value.as_mut() else {
                    continue;
                };
                teardown(handle, value);
                slot.live_index as usize
            };

            lists.live.swap_remove(live_index);
            if let Some(&moved) = lists.live.get(live_index) {
                slots[moved as usize].get_mut().live_index = live_index as u32;
            }

            let slot = slots[index].get_mut();
            slot.generation = slot.generation.wrapping_add(1);
            drop(slot.value.take());
            lists.free.push(handle.index());
            freed += 1;
        }

        pending.clear();
        lists.pending_free = pending;
        freed
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lists = self.lists.lock();
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("live", &lists.live.len())
            .field("pending_free", &lists.pending_free.len())
            .finish()
    }
}
