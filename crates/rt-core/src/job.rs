//! The job: a mutable, reference-counted instance of a task's execution at one arrival (§3).

use rt_config::{CriticalityLevel, TaskId, MAX_CRITICALITY_LEVELS};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Index of a core within its processor (cores of one processor share one address space;
/// migration never crosses a processor boundary, §4.7).
pub type CoreId = u32;

/// A job's lifecycle state (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Materialized but not yet queued (transient).
    Idle,
    /// Waiting in a ready/replica/discard/pending queue.
    Ready,
    /// Currently occupying a core's running slot.
    Running,
    /// Reached its ACET; no longer schedulable.
    Completed,
    /// Unlinked from every queue; awaiting pool reclaim.
    Removed,
}

/// The mutable state of one job (§3).
///
/// Scalar fields (deadlines, WCET, executed time, state) are mutated only by whichever core
/// currently holds this job in a locked queue or its running slot — there is deliberately no
/// per-job lock, mirroring §5 ("no global scheduler mutex"). `refcount` and `being_offered`
/// are the two fields genuinely touched from more than one core without a lock, so they are
/// atomics.
#[derive(Debug)]
pub struct JobData {
    /// The task this job is an instance of.
    pub task_id: TaskId,
    /// This job's parent task's own declared criticality (used by mode-change filtering).
    pub task_criticality: CriticalityLevel,
    /// Tick at which this job arrived.
    pub arrival_tick: u64,
    /// Tuned relative deadlines at each criticality level, copied from the allocation entry.
    pub tuned_deadline: [u32; MAX_CRITICALITY_LEVELS],
    /// `arrival_tick + task.relative_deadline`; never recomputed after creation.
    pub actual_deadline: u64,
    /// `arrival_tick + tuned_deadline[current_level]`; recomputed on mode change.
    pub virtual_deadline: u64,
    /// WCET vector copied from the task, at each criticality level.
    pub wcet: [u32; MAX_CRITICALITY_LEVELS],
    /// WCET at the job's current criticality level; recomputed on mode change.
    pub current_wcet: u32,
    /// Actual-case execution time, sampled once at job creation.
    pub acet: u32,
    /// Ticks of (DVFS-scaled) execution accumulated so far. Fractional because each real tick
    /// contributes `current DVFS scaling factor` worth of progress, not a full tick (§4.5 step 3).
    pub executed_time: f64,
    /// Lifecycle state.
    pub state: JobState,
    /// Whether this is a replica instance (vs. primary).
    pub is_replica: bool,
    /// The core whose pool this slot belongs to.
    pub pool_origin: CoreId,
    /// Tick before which this job may not be migrated again (anti-ping-pong).
    pub next_migration_eligible_tick: u64,
    refcount: AtomicUsize,
    being_offered: AtomicBool,
}

impl JobData {
    /// Construct a freshly-materialized job at `current_level`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: TaskId,
        task_criticality: CriticalityLevel,
        arrival_tick: u64,
        relative_deadline: u32,
        tuned_deadline: [u32; MAX_CRITICALITY_LEVELS],
        wcet: [u32; MAX_CRITICALITY_LEVELS],
        acet: u32,
        is_replica: bool,
        pool_origin: CoreId,
        current_level: CriticalityLevel,
    ) -> Self {
        let current_wcet = wcet[current_level as usize];
        let virtual_deadline = arrival_tick + u64::from(tuned_deadline[current_level as usize]);
        Self {
            task_id,
            task_criticality,
            arrival_tick,
            tuned_deadline,
            actual_deadline: arrival_tick + u64::from(relative_deadline),
            virtual_deadline,
            wcet,
            current_wcet,
            acet,
            executed_time: 0.0,
            state: JobState::Idle,
            is_replica,
            pool_origin,
            next_migration_eligible_tick: 0,
            refcount: AtomicUsize::new(1),
            being_offered: AtomicBool::new(false),
        }
    }

    /// Recompute `virtual_deadline` and `current_wcet` for a new criticality level (§4.5 step 1).
    pub fn retune(&mut self, level: CriticalityLevel) {
        self.virtual_deadline = self.arrival_tick + u64::from(self.tuned_deadline[level as usize]);
        self.current_wcet = self.wcet[level as usize];
    }

    /// Remaining WCET at the given level, floored at zero (§4.4 demand computation).
    #[must_use]
    pub fn remaining_wcet_at(&self, level: CriticalityLevel) -> f64 {
        (f64::from(self.wcet[level as usize]) - self.executed_time).max(0.0)
    }

    /// Advance `executed_time` by one tick at the given DVFS scaling factor (§4.5 step 3).
    pub fn progress(&mut self, scaling_factor: f64) {
        self.executed_time += scaling_factor;
    }

    /// `true` once this job has consumed its ACET.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.executed_time >= f64::from(self.acet)
    }

    /// `true` once this job has crossed its current-level WCET without completing.
    #[must_use]
    pub fn has_overrun_wcet(&self) -> bool {
        self.executed_time >= f64::from(self.current_wcet) && !self.is_complete()
    }

    pub(crate) fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub(crate) fn incr_ref(&self) {
        let _prev = self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns `true` if this was the last reference (caller must then return the slot).
    pub(crate) fn decr_ref(&self) -> bool {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        assert!(prev >= 1, "refcount underflow: put_ref called on an already-dead job");
        prev == 1
    }

    /// CAS `being_offered` false → true. `true` on success (§4.7 step 1).
    pub fn try_mark_offered(&self) -> bool {
        self.being_offered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clear `being_offered` (§4.7 steps 3–5).
    pub fn clear_offered(&self) {
        self.being_offered.store(false, Ordering::Release);
    }

    /// Whether this job is currently out on a migration offer.
    #[must_use]
    pub fn is_being_offered(&self) -> bool {
        self.being_offered.load(Ordering::Acquire)
    }

    /// Deep-copy every visible field into a fresh, independent `JobData` (§4.2 `clone_job`):
    /// refcount reset to 1, `being_offered` reset to false, pool origin reassigned to
    /// `cloner_core`. Used to send a job across a core boundary without aliasing the source
    /// pool's slot from a foreign thread.
    #[must_use]
    pub fn clone_for_pool(&self, cloner_core: CoreId) -> Self {
        Self {
            task_id: self.task_id,
            task_criticality: self.task_criticality,
            arrival_tick: self.arrival_tick,
            tuned_deadline: self.tuned_deadline,
            actual_deadline: self.actual_deadline,
            virtual_deadline: self.virtual_deadline,
            wcet: self.wcet,
            current_wcet: self.current_wcet,
            acet: self.acet,
            executed_time: self.executed_time,
            state: self.state,
            is_replica: self.is_replica,
            pool_origin: cloner_core,
            next_migration_eligible_tick: self.next_migration_eligible_tick,
            refcount: AtomicUsize::new(1),
            being_offered: AtomicBool::new(false),
        }
    }
}

/// A cheap, owned snapshot of the fields [`crate::slack::find_slack`] needs from a job.
///
/// Demand-bound computation walks every job on a core once per tick per criticality level; doing
/// that over borrowed `&JobData` forces the borrow of a locked queue to outlive the whole
/// computation, which collides with needing the same lock to requeue a job afterwards. Cloning
/// five small fields out from under the lock up front avoids the conflict entirely.
#[derive(Debug, Clone, Copy)]
pub struct JobDemandView {
    /// The job's arrival tick.
    pub arrival_tick: u64,
    /// Tuned relative deadlines at each criticality level.
    pub tuned_deadline: [u32; MAX_CRITICALITY_LEVELS],
    /// WCET at each criticality level.
    pub wcet: [u32; MAX_CRITICALITY_LEVELS],
    /// Execution time accumulated so far.
    pub executed_time: f64,
}

impl From<&JobData> for JobDemandView {
    fn from(job: &JobData) -> Self {
        Self {
            arrival_tick: job.arrival_tick,
            tuned_deadline: job.tuned_deadline,
            wcet: job.wcet,
            executed_time: job.executed_time,
        }
    }
}
