//! Loggable (non-fatal) conditions raised by the tick pipeline (§7).
//!
//! None of these are propagated as `Result` out of the dispatcher — §7's policy table treats
//! every one of them as locally recoverable. They exist as a `thiserror` enum purely so call
//! sites can format a single structured WARN line (`tracing::warn!(%err, ...)`) instead of
//! hand-building a message per call site.

/// A locally recoverable condition encountered during a core's tick pipeline.
#[derive(thiserror::Error, Debug)]
pub enum RecoverableCondition {
    /// `create_job` found the owning core's pool exhausted (§7: "not a fatal condition").
    #[error("pool exhausted on core {core_id}, dropping arrival for task {task_id}")]
    PoolExhausted {
        /// The core whose pool was full.
        core_id: u32,
        /// The task whose arrival (or clone) was dropped.
        task_id: rt_config::TaskId,
    },

    /// A ring buffer rejected an enqueue because it was full (§7).
    #[error("{ring} ring full on core {core_id}, dropping {item}")]
    RingFull {
        /// Which ring rejected the enqueue.
        ring: &'static str,
        /// The core that observed the full ring.
        core_id: u32,
        /// A short description of the dropped item.
        item: &'static str,
    },

    /// A sibling completion referenced a job no longer present locally (§7: ignored).
    #[error("stale completion for task {task_id} arrival {arrival_tick}, no matching local job")]
    StaleCompletion {
        /// The task the completion referred to.
        task_id: rt_config::TaskId,
        /// The arrival instant the completion referred to.
        arrival_tick: u64,
    },

    /// A delegation record's arrival had already passed (§7: released, not skipped locally).
    #[error("stale delegation for task {task_id} arrival {arrival_tick}, releasing")]
    StaleDelegation {
        /// The delegated task.
        task_id: rt_config::TaskId,
        /// The delegated arrival instant.
        arrival_tick: u64,
    },
}
