//! The static allocation table (§3): which (task, role) runs on which (processor, core).

use crate::task::TaskId;
use crate::MAX_CRITICALITY_LEVELS;
use serde::Deserialize;

/// Whether an allocation entry is the primary instance of a task or a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationRole {
    /// The primary instance; completion of the primary cancels sibling replicas.
    Primary,
    /// A replica instance, removed from its queue when a sibling primary completes.
    Replica,
}

impl AllocationRole {
    /// Whether this entry is a replica.
    #[must_use]
    pub fn is_replica(self) -> bool {
        matches!(self, AllocationRole::Replica)
    }
}

/// One (task, role) → (processor, core) placement, with per-criticality tuned deadlines.
///
/// A task with replicas has multiple `AllocationEntry` rows: one primary and one entry
/// per replica, typically on distinct cores.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocationEntry {
    /// The task this entry places.
    pub task_id: TaskId,
    /// Primary or replica.
    pub role: AllocationRole,
    /// Target processor.
    pub processor_id: u32,
    /// Target core within the processor.
    pub core_id: u32,
    /// Relative deadline at each criticality level, tighter than the task's actual deadline.
    pub tuned_deadline: [u32; MAX_CRITICALITY_LEVELS],
}

impl AllocationEntry {
    /// Tuned relative deadline at the given criticality level.
    #[must_use]
    pub fn tuned_deadline_at(&self, level: u8) -> u32 {
        self.tuned_deadline[level as usize]
    }
}
