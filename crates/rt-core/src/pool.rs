//! Per-core job slab allocator (§3, §7).
//!
//! Every core owns exactly one [`JobPool`]. The owning core's tick thread allocates and frees
//! slots without ever taking a lock; any other core releasing the last reference to one of this
//! pool's jobs (after a migration or a cross-core completion broadcast) pushes the freed index
//! onto a mutex-protected remote free list instead, which the owner drains the next time its own
//! local free list runs dry. This mirrors the "local fast path, remote slow path" shape of
//! `rt_ring`'s single-producer fast path, one layer up the stack.
#![allow(unsafe_code)]

use crate::job::{CoreId, JobData};
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, Ordering};

/// A pool slot: either holding a live job, or vacant.
struct Slot {
    occupied: AtomicBool,
    data: UnsafeCell<MaybeUninit<JobData>>,
}

// SAFETY: access to `data` is gated by `occupied` plus the pool's free-list bookkeeping, which
// together guarantee at most one owner mutates a slot's payload at a time. See `JobPool` docs.
unsafe impl Sync for Slot {}

/// Fixed-capacity slab of job slots owned by one core.
///
/// # Safety contract
/// `alloc`, `get`, and `get_mut` may only be called from the owning core's own thread. Any
/// thread may call `put_ref`/`release_remote`; those paths only ever touch `remote_free` and
/// the refcount inside the job itself, never the slot's occupancy bit directly.
pub struct JobPool {
    owner_core: CoreId,
    slots: Box<[Slot]>,
    local_free: UnsafeCell<Vec<usize>>,
    remote_free: Mutex<Vec<usize>>,
}

/// Returned by [`JobPool::alloc`] when every slot is in use (§7: "not a fatal condition").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted;

impl JobPool {
    /// Build a pool of `capacity` slots for `owner_core`, all initially free.
    #[must_use]
    pub fn new(owner_core: CoreId, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                occupied: AtomicBool::new(false),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let local_free = (0..capacity).rev().collect::<Vec<_>>();
        Self {
            owner_core,
            slots,
            local_free: UnsafeCell::new(local_free),
            remote_free: Mutex::new(Vec::new()),
        }
    }

    /// The core this pool belongs to.
    #[must_use]
    pub fn owner_core(&self) -> CoreId {
        self.owner_core
    }

    /// Total slot count.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Allocate a slot and move `data` into it, owner-thread only.
    ///
    /// Drains the remote free list first if the local one is empty, per the doc comment above.
    pub fn alloc(&self, data: JobData) -> Result<usize, PoolExhausted> {
        // SAFETY: owner-thread-only per the struct's safety contract.
        let local = unsafe { &mut *self.local_free.get() };
        if local.is_empty() {
            let mut remote = self.remote_free.lock();
            local.append(&mut remote);
        }
        let index = local.pop().ok_or(PoolExhausted)?;
        let slot = &self.slots[index];
        // SAFETY: slot was on a free list, so no other reference to its payload exists.
        unsafe {
            (*slot.data.get()).write(data);
        }
        slot.occupied.store(true, Ordering::Release);
        Ok(index)
    }

    /// Borrow the job at `index`, owner-thread only. Panics if the slot is not occupied.
    #[must_use]
    pub fn get(&self, index: usize) -> &JobData {
        let slot = &self.slots[index];
        assert!(slot.occupied.load(Ordering::Acquire), "get() on a vacant slot");
        // SAFETY: occupied slots are only ever touched for their payload by the owner thread
        // (reads) or through the refcount/free-list machinery (no payload access).
        unsafe { (*slot.data.get()).assume_init_ref() }
    }

    /// Mutably borrow the job at `index`, owner-thread only. Panics if the slot is not occupied.
    pub fn get_mut(&self, index: usize) -> &mut JobData {
        let slot = &self.slots[index];
        assert!(slot.occupied.load(Ordering::Acquire), "get_mut() on a vacant slot");
        // SAFETY: see `get`; `&mut self` is not required because exclusivity here is a
        // thread-locality invariant, not a borrow-checker one — matching `rt_ring`'s slots.
        unsafe { (*slot.data.get()).assume_init_mut() }
    }

    /// Increment the refcount of the job at `index`. May be called from any core.
    pub fn get_ref(&self, index: usize) {
        self.get(index).incr_ref();
    }

    /// Decrement the refcount of the job at `index`; if it reaches zero, drop the payload and
    /// return the slot to a free list. `releaser_is_owner` selects which free list — the local
    /// one (no lock) if the caller is this pool's owning core, the remote one (locked) otherwise.
    pub fn put_ref(&self, index: usize, releaser_is_owner: bool) {
        let slot = &self.slots[index];
        // SAFETY: occupied, checked below via the refcount that only reaches here while >=1.
        let data = unsafe { (*slot.data.get()).assume_init_ref() };
        if !data.decr_ref() {
            return;
        }
        // SAFETY: refcount just hit zero, so no other holder can observe or touch this slot
        // again until it is reallocated; safe to drop in place and clear occupancy.
        unsafe {
            (*slot.data.get()).assume_init_drop();
        }
        slot.occupied.store(false, Ordering::Release);
        if releaser_is_owner {
            // SAFETY: owner-thread-only per the struct's safety contract.
            let local = unsafe { &mut *self.local_free.get() };
            local.push(index);
        } else {
            self.remote_free.lock().push(index);
        }
    }

    /// Clone `source`'s visible fields into a fresh slot of this pool (§4.2 `clone_job`):
    /// refcount reset to 1, `being_offered` reset to false, pool origin reassigned to this pool's
    /// owner. Owner-thread only, same as `alloc`. Used to materialize a migration offer's payload
    /// on the destination's own pool rather than aliasing the donor's slot.
    pub fn clone_job(&self, source: &JobData) -> Result<usize, PoolExhausted> {
        self.alloc(source.clone_for_pool(self.owner_core))
    }

    /// Number of slots currently in use (approximate if called off the owner thread).
    #[must_use]
    pub fn len_occupied(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.occupied.load(Ordering::Acquire))
            .count()
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            if slot.occupied.load(Ordering::Acquire) {
                // SAFETY: pool is being torn down, no other thread holds a pointer to it.
                unsafe {
                    (*slot.data.get()).assume_init_drop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_config::MAX_CRITICALITY_LEVELS;

    fn sample_job(pool_origin: CoreId) -> JobData {
        JobData::new(
            rt_config::TaskId(1),
            1,
            0,
            10,
            [10; MAX_CRITICALITY_LEVELS],
            [3; MAX_CRITICALITY_LEVELS],
            3,
            false,
            pool_origin,
            1,
        )
    }

    #[test]
    fn alloc_and_free_round_trip() {
        let pool = JobPool::new(0, 4);
        let idx = pool.alloc(sample_job(0)).unwrap();
        assert_eq!(pool.len_occupied(), 1);
        pool.put_ref(idx, true);
        assert_eq!(pool.len_occupied(), 0);
        // slot reusable
        let idx2 = pool.alloc(sample_job(0)).unwrap();
        assert_eq!(idx2, idx);
    }

    #[test]
    fn exhaustion_reports_not_fatal() {
        let pool = JobPool::new(0, 1);
        let _idx = pool.alloc(sample_job(0)).unwrap();
        assert_eq!(pool.alloc(sample_job(0)), Err(PoolExhausted));
    }

    #[test]
    fn remote_release_returns_to_remote_free_list_then_drained() {
        let pool = JobPool::new(0, 1);
        let idx = pool.alloc(sample_job(0)).unwrap();
        pool.get_ref(idx);
        // two refs now; release one as "remote" (simulating another core's JobRef drop)
        pool.put_ref(idx, false);
        assert_eq!(pool.len_occupied(), 1, "still one live ref");
        pool.put_ref(idx, false);
        assert_eq!(pool.len_occupied(), 0);
        let idx2 = pool.alloc(sample_job(0)).unwrap();
        assert_eq!(idx2, idx, "remote free list drained into local on next alloc");
    }

    #[test]
    #[should_panic(expected = "refcount underflow")]
    fn double_release_panics() {
        let pool = JobPool::new(0, 1);
        let idx = pool.alloc(sample_job(0)).unwrap();
        pool.put_ref(idx, true);
        pool.put_ref(idx, true);
    }

    #[test]
    fn clone_job_materializes_an_independent_copy() {
        let donor = JobPool::new(0, 4);
        let destination = JobPool::new(1, 4);
        let idx = donor.alloc(sample_job(0)).unwrap();

        let clone_idx = destination.clone_job(donor.get(idx)).unwrap();
        assert_eq!(donor.len_occupied(), 1, "cloning leaves the source slot untouched");
        assert_eq!(destination.len_occupied(), 1);
        assert_eq!(destination.get(clone_idx).pool_origin, 1, "the clone's pool origin is the cloner's core");
        assert!(!destination.get(clone_idx).is_being_offered(), "the clone starts with the offered flag cleared");

        donor.put_ref(idx, true);
        assert_eq!(destination.len_occupied(), 1, "releasing the donor's original never touches the clone");
    }

    #[test]
    fn clone_job_reports_destination_exhaustion() {
        let donor = JobPool::new(0, 1);
        let destination = JobPool::new(1, 1);
        let idx = donor.alloc(sample_job(0)).unwrap();
        let _occupant = destination.alloc(sample_job(1)).unwrap();

        assert_eq!(destination.clone_job(donor.get(idx)), Err(PoolExhausted));
        assert_eq!(donor.len_occupied(), 1, "a destination-side exhaustion never costs the donor its job");
    }
}
