//! Per-processor state (§3 "Per-processor state", §5 "Tick protocol").

use crate::queue::JobQueue;
use parking_lot::Mutex;
use rt_config::TaskId;
use rt_ring::RingBuffer;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Barrier;

/// A completion, as carried on the processor's inter-processor completion rings and, once
/// harvested by the timer, the read-only snapshot cores consult during tick step 5 (§4.5,
/// §4.8). Wire encoding (u32 fields) is `rt_transport`'s concern; within a process this carries
/// full-width ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRecord {
    /// The task that completed.
    pub task_id: TaskId,
    /// The arrival instant of the completed job.
    pub arrival_tick: u64,
    /// The system tick the completion was observed at.
    pub system_tick: u64,
}

/// Global, cross-core state for one processor.
pub struct ProcessorState {
    /// This processor's id.
    pub processor_id: u32,
    /// Global criticality level, monotone non-decreasing for the life of a run (§5).
    global_criticality: AtomicU8,
    /// Logical tick counter, advanced once per tick by the timer thread alone.
    tick: AtomicU64,
    /// Set on a fatal deadline miss or external stop request; breaks all core loops (§5, §7).
    shutdown: AtomicBool,
    /// Jobs demoted by mode change that were not locally reclaimable, available to any core on
    /// this processor with sufficient slack (§4.5 step 6).
    pub cross_core_discard: Mutex<JobQueue>,
    /// Raw inbound completions from the transport layer, drained by the timer each tick.
    pub completion_incoming: RingBuffer<CompletionRecord>,
    /// Raw outbound completions awaiting transmission by the transport layer.
    pub completion_outgoing: RingBuffer<CompletionRecord>,
    /// This tick's visible-to-cores completion set, harvested from `completion_incoming` by the
    /// timer at the previous tick boundary (§5: "visible ... at tick t+1").
    completion_snapshot: Mutex<Vec<CompletionRecord>>,
    /// Cores reach this after finishing their per-tick pipeline; the timer alone proceeds past
    /// it to do cross-tick cleanup (§5 step 1-2).
    pub core_completion_barrier: Barrier,
    /// Cores and the timer both reach this before the next tick begins (§5 step 3).
    pub time_sync_barrier: Barrier,
}

impl ProcessorState {
    /// Construct processor state for `num_cores` worker threads plus the timer thread sharing
    /// the two barriers.
    #[must_use]
    pub fn new(
        processor_id: u32,
        num_cores: usize,
        completion_ring_capacity: usize,
    ) -> Self {
        let barrier_parties = num_cores + 1;
        Self {
            processor_id,
            global_criticality: AtomicU8::new(0),
            tick: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            cross_core_discard: Mutex::new(JobQueue::new()),
            completion_incoming: RingBuffer::new(completion_ring_capacity)
                .expect("completion ring capacity must be >= 3"),
            completion_outgoing: RingBuffer::new(completion_ring_capacity)
                .expect("completion ring capacity must be >= 3"),
            completion_snapshot: Mutex::new(Vec::new()),
            core_completion_barrier: Barrier::new(barrier_parties),
            time_sync_barrier: Barrier::new(barrier_parties),
        }
    }

    /// Current global criticality level.
    #[must_use]
    pub fn global_criticality(&self) -> u8 {
        self.global_criticality.load(Ordering::Acquire)
    }

    /// Raise the global criticality to `level` iff it strictly exceeds the current one (§6:
    /// "honored only if the new level strictly exceeds the current global level"). Returns
    /// `true` if it changed.
    pub fn raise_global_criticality(&self, level: u8) -> bool {
        self.global_criticality
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (level > current).then_some(level)
            })
            .is_ok()
    }

    /// Current logical tick.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Advance the tick counter by one. Timer-thread only.
    pub fn advance_tick(&self) {
        self.tick.fetch_add(1, Ordering::AcqRel);
    }

    /// `true` once a fatal condition or external stop has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Request shutdown (fatal deadline miss or SIGINT-style stop, §5 "Cancellation").
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Replace the cores'-visible completion snapshot with `records`, timer-thread only.
    pub fn publish_completion_snapshot(&self, records: Vec<CompletionRecord>) {
        *self.completion_snapshot.lock() = records;
    }

    /// Clone out this tick's visible completion snapshot for a core to scan (§4.5 step 5).
    #[must_use]
    pub fn completion_snapshot(&self) -> Vec<CompletionRecord> {
        self.completion_snapshot.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_criticality_only_rises() {
        let state = ProcessorState::new(0, 1, 8);
        assert!(state.raise_global_criticality(2));
        assert_eq!(state.global_criticality(), 2);
        assert!(!state.raise_global_criticality(1), "must not lower");
        assert_eq!(state.global_criticality(), 2);
        assert!(state.raise_global_criticality(3));
        assert_eq!(state.global_criticality(), 3);
    }

    #[test]
    fn completion_snapshot_round_trips() {
        let state = ProcessorState::new(0, 1, 8);
        let records = vec![CompletionRecord { task_id: TaskId(1), arrival_tick: 10, system_tick: 11 }];
        state.publish_completion_snapshot(records.clone());
        assert_eq!(state.completion_snapshot(), records);
    }
}
