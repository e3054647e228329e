//! A fixed-capacity, lock-free multi-producer/multi-consumer ring buffer (§4.1).
//!
//! This is the Vyukov bounded-MPMC-queue layout: a contiguous array of slots, each carrying
//! its own sequence number, initialized to the slot's index. A producer reserves a slot by
//! CASing the shared `enqueue_pos` counter, writes the payload, then releases the slot by
//! storing `pos + 1` into its sequence number. A consumer mirrors this on `dequeue_pos`,
//! releasing with `pos + capacity` so the slot is immediately recognizable as free for the
//! next lap around the buffer.
//!
//! Every core and processor message path in this scheduler — completion messages, migration
//! requests, delegation acks — is built on one of these: see `rt-core`'s `CoreInboxes` and
//! `rt-transport`'s processor-to-processor rings.
//!
//! # Safety
//!
//! The slot storage needs a cell that can be written by one producer and read by one
//! consumer without either holding a lock; that is inherently unsafe in Rust (there is no
//! safe abstraction over "this memory is exclusively ours for as long as the sequence number
//! says so"). This is the one crate in the workspace where `unsafe_code` is allowed; every
//! unsafe block below carries a comment tying it to the sequence-number invariant that makes
//! it sound.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

mod padded;
use padded::CachePadded;

/// Outcome of a single, non-spinning enqueue attempt.
#[derive(Debug)]
pub enum EnqueueOutcome<T> {
    /// The value was stored.
    Enqueued,
    /// The buffer is full; the value is handed back to the caller.
    Full(T),
    /// Another producer raced this slot; the value is handed back so the caller can retry.
    Contended(T),
}

/// Outcome of a single, non-spinning dequeue attempt.
#[derive(Debug)]
pub enum DequeueOutcome<T> {
    /// A value was dequeued.
    Dequeued(T),
    /// The buffer is empty.
    Empty,
    /// Another consumer raced this slot; retry.
    Contended,
}

/// Error building a [`RingBuffer`] with an invalid capacity.
#[derive(Debug, thiserror::Error)]
pub enum CapacityError {
    /// Capacity must be at least 3 (§4.1).
    #[error("ring buffer capacity must be at least 3, got {0}")]
    TooSmall(usize),
}

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A fixed-capacity, lock-free MPMC ring buffer.
pub struct RingBuffer<T> {
    buffer: Box<[Slot<T>]>,
    capacity: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

// SAFETY: access to each slot's `UnsafeCell` is always gated by a successful CAS on
// `enqueue_pos`/`dequeue_pos` plus the matching sequence-number check, which together give
// each writer/reader exclusive access to its slot for the duration of the write/read. `T`
// itself must be `Send` since ownership of values crosses threads.
unsafe impl<T: Send> Send for RingBuffer<T> {}
// SAFETY: see above; shared references only ever perform the gated slot access.
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Build a ring buffer with the given fixed capacity (must be `>= 3`, §4.1).
    pub fn new(capacity: usize) -> Result<Self, CapacityError> {
        if capacity < 3 {
            return Err(CapacityError::TooSmall(capacity));
        }
        let buffer = (0..capacity)
            .map(|i| Slot { sequence: AtomicUsize::new(i), value: UnsafeCell::new(MaybeUninit::uninit()) })
            .collect();
        Ok(Self {
            buffer,
            capacity,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Fixed capacity of this buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A snapshot of `enqueued - dequeued`; may be stale the instant it is read under
    /// concurrent use, but is exact for a quiesced buffer (used by tests and by `clear`).
    #[must_use]
    pub fn len_hint(&self) -> usize {
        let tail = self.enqueue_pos.load(Ordering::Relaxed);
        let head = self.dequeue_pos.load(Ordering::Relaxed);
        tail.saturating_sub(head)
    }

    /// Attempt to enqueue `value`, making exactly one reservation attempt (§4.1).
    pub fn try_enqueue(&self, value: T) -> EnqueueOutcome<T> {
        let pos = self.enqueue_pos.load(Ordering::Relaxed);
        let idx = pos % self.capacity;
        let slot = &self.buffer[idx];
        let seq = slot.sequence.load(Ordering::Acquire);
        let diff = seq as isize - pos as isize;

        if diff == 0 {
            match self.enqueue_pos.compare_exchange_weak(
                pos,
                pos + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    // SAFETY: this call won the CAS that reserved logical position `pos`,
                    // which no other producer can also win; the slot's previous consumer (if
                    // any) already released it via a `Release` store that we observed through
                    // the `Acquire` load above, so we have exclusive write access until we
                    // publish via the sequence store below.
                    unsafe {
                        (*slot.value.get()).write(value);
                    }
                    slot.sequence.store(pos + 1, Ordering::Release);
                    EnqueueOutcome::Enqueued
                }
                Err(_) => EnqueueOutcome::Contended(value),
            }
        } else if diff < 0 {
            EnqueueOutcome::Full(value)
        } else {
            // Another producer has already advanced `enqueue_pos` past what we observed;
            // from this caller's point of view that is indistinguishable from contention.
            EnqueueOutcome::Contended(value)
        }
    }

    /// Attempt to dequeue a value, making exactly one reservation attempt (§4.1).
    pub fn try_dequeue(&self) -> DequeueOutcome<T> {
        let pos = self.dequeue_pos.load(Ordering::Relaxed);
        let idx = pos % self.capacity;
        let slot = &self.buffer[idx];
        let seq = slot.sequence.load(Ordering::Acquire);
        let diff = seq as isize - (pos as isize + 1);

        if diff == 0 {
            match self.dequeue_pos.compare_exchange_weak(
                pos,
                pos + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    // SAFETY: this call won the CAS reserving logical position `pos` for
                    // consumption; the producer's `Release` store of `seq = pos + 1` (observed
                    // via the `Acquire` load above) handed us exclusive read access to the
                    // value it wrote.
                    let value = unsafe { (*slot.value.get()).assume_init_read() };
                    slot.sequence.store(pos + self.capacity, Ordering::Release);
                    DequeueOutcome::Dequeued(value)
                }
                Err(_) => DequeueOutcome::Contended,
            }
        } else if diff < 0 {
            DequeueOutcome::Empty
        } else {
            DequeueOutcome::Contended
        }
    }

    /// Spin until a value is enqueued or the buffer is observed full.
    pub fn blocking_enqueue(&self, mut value: T) -> Result<(), T> {
        loop {
            match self.try_enqueue(value) {
                EnqueueOutcome::Enqueued => return Ok(()),
                EnqueueOutcome::Full(v) => return Err(v),
                EnqueueOutcome::Contended(v) => {
                    value = v;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Spin until a value is dequeued or the buffer is observed empty.
    pub fn blocking_dequeue(&self) -> Option<T> {
        loop {
            match self.try_dequeue() {
                DequeueOutcome::Dequeued(v) => return Some(v),
                DequeueOutcome::Empty => return None,
                DequeueOutcome::Contended => std::hint::spin_loop(),
            }
        }
    }

    /// Drain every pending item, in order, via a blocking dequeue loop.
    pub fn drain_all(&self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(v) = self.blocking_dequeue() {
            out.push(v);
        }
        out
    }

    /// Discard all currently-enqueued-but-unread items (§4.1).
    ///
    /// Used by the timer thread between ticks to drop stale completion messages that no core
    /// consumed this tick: the current tick only cares about this tick's messages.
    ///
    /// # Safety contract
    ///
    /// The caller must guarantee there are no concurrent producers (and no other consumer)
    /// while `clear` runs; it is not itself lock-free-safe against concurrent enqueuers,
    /// exactly as specified in §4.1.
    pub fn clear(&self) {
        let tail = self.enqueue_pos.load(Ordering::Relaxed);
        let head = self.dequeue_pos.load(Ordering::Relaxed);
        for pos in head..tail {
            let idx = pos % self.capacity;
            let slot = &self.buffer[idx];
            // SAFETY: caller guarantees no concurrent producer/consumer access during clear,
            // and every slot in [head, tail) holds a live value written by a past enqueue.
            unsafe {
                (*slot.value.get()).assume_init_drop();
            }
            slot.sequence.store(pos + self.capacity, Ordering::Release);
        }
        self.dequeue_pos.store(tail, Ordering::Relaxed);
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        // Drop any values still live between dequeue_pos and enqueue_pos.
        let tail = *self.enqueue_pos.get_mut();
        let head = *self.dequeue_pos.get_mut();
        for pos in head..tail {
            let idx = pos % self.capacity;
            // SAFETY: `&mut self` guarantees no concurrent access; every slot in [head, tail)
            // holds a live value that was never consumed.
            unsafe {
                (*self.buffer[idx].value.get()).assume_init_drop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_tiny_capacity() {
        assert!(matches!(RingBuffer::<u32>::new(2), Err(CapacityError::TooSmall(2))));
        assert!(RingBuffer::<u32>::new(3).is_ok());
    }

    #[test]
    fn spsc_round_trip_preserves_order() {
        let ring = RingBuffer::new(8).expect("capacity");
        for i in 0..8u32 {
            assert!(matches!(ring.try_enqueue(i), EnqueueOutcome::Enqueued));
        }
        assert!(matches!(ring.try_enqueue(99), EnqueueOutcome::Full(99)));

        let mut out = Vec::new();
        while let DequeueOutcome::Dequeued(v) = ring.try_dequeue() {
            out.push(v);
        }
        assert_eq!(out, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn reuses_slots_after_drain() {
        let ring = RingBuffer::new(4).expect("capacity");
        for i in 0..4u32 {
            assert!(matches!(ring.try_enqueue(i), EnqueueOutcome::Enqueued));
        }
        assert_eq!(ring.drain_all(), vec![0, 1, 2, 3]);
        for i in 100..104u32 {
            assert!(matches!(ring.try_enqueue(i), EnqueueOutcome::Enqueued));
        }
        assert_eq!(ring.drain_all(), vec![100, 101, 102, 103]);
    }

    #[test]
    fn clear_discards_unread_items_and_frees_slots() {
        let ring = RingBuffer::new(4).expect("capacity");
        assert!(matches!(ring.try_enqueue(1u32), EnqueueOutcome::Enqueued));
        assert!(matches!(ring.try_enqueue(2u32), EnqueueOutcome::Enqueued));
        ring.clear();
        assert_eq!(ring.len_hint(), 0);
        for i in 0..4u32 {
            assert!(matches!(ring.try_enqueue(i), EnqueueOutcome::Enqueued));
        }
        assert_eq!(ring.drain_all(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn mpmc_multiset_equality_under_contention() {
        let ring = Arc::new(RingBuffer::<u64>::new(64).expect("capacity"));
        let producers = 4;
        let per_producer = 2000u64;
        let consumers = 4;

        let mut handles = Vec::new();
        for p in 0..producers {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for i in 0..per_producer {
                    let value = p * per_producer + i;
                    let mut v = value;
                    loop {
                        match ring.try_enqueue(v) {
                            EnqueueOutcome::Enqueued => break,
                            EnqueueOutcome::Full(back) | EnqueueOutcome::Contended(back) => {
                                v = back;
                                std::thread::yield_now();
                            }
                        }
                    }
                }
            }));
        }

        let collected = Arc::new(std::sync::Mutex::new(Vec::new()));
        let total = producers * per_producer;
        for _ in 0..consumers {
            let ring = Arc::clone(&ring);
            let collected = Arc::clone(&collected);
            handles.push(thread::spawn(move || loop {
                match ring.try_dequeue() {
                    DequeueOutcome::Dequeued(v) => collected.lock().expect("lock").push(v),
                    DequeueOutcome::Empty => {
                        if collected.lock().expect("lock").len() as u64 >= total {
                            return;
                        }
                        std::thread::yield_now();
                    }
                    DequeueOutcome::Contended => std::thread::yield_now(),
                }
            }));
        }

        for h in handles {
            h.join().expect("producer/consumer thread panicked");
        }

        let mut out = collected.lock().expect("lock").clone();
        out.sort_unstable();
        let mut expected: Vec<u64> = (0..total).collect();
        expected.sort_unstable();
        assert_eq!(out, expected, "multiset of dequeued values must equal enqueued values");
    }
}
