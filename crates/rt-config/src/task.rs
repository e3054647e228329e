//! The static, read-only task table (§3, §6).

use crate::MAX_CRITICALITY_LEVELS;
use serde::Deserialize;

/// Identifier of a task in the static table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct TaskId(pub u32);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Automotive-style safety integrity level, encoded `0..=4` as QM < A < B < C < D.
pub type CriticalityLevel = u8;

/// QM, the lowest criticality level.
pub const CRIT_QM: CriticalityLevel = 0;
/// ASIL A.
pub const CRIT_A: CriticalityLevel = 1;
/// ASIL B.
pub const CRIT_B: CriticalityLevel = 2;
/// ASIL C.
pub const CRIT_C: CriticalityLevel = 3;
/// ASIL D, the highest criticality level.
pub const CRIT_D: CriticalityLevel = 4;

/// An immutable periodic task, as read from the static task table.
///
/// `wcet` and a job's tuned deadlines (carried on [`crate::allocation::AllocationEntry`])
/// are both indexed by [`CriticalityLevel`].
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// Period between successive arrivals, in ticks.
    pub period: u32,
    /// Relative deadline from arrival, in ticks, used to compute a job's actual deadline.
    pub relative_deadline: u32,
    /// Worst-case execution time at each criticality level, in ticks.
    pub wcet: [u32; MAX_CRITICALITY_LEVELS],
    /// This task's own declared criticality level.
    pub criticality: CriticalityLevel,
    /// Number of replicas configured for this task (0 if none).
    pub replica_count: u32,
}

impl Task {
    /// WCET of this task at the given criticality level.
    #[must_use]
    pub fn wcet_at(&self, level: CriticalityLevel) -> u32 {
        self.wcet[level as usize]
    }
}
