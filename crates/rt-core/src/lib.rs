//! Per-core tick pipeline: job lifecycle, EDF dispatch, slack/admission, DVFS/DPM, migration.
//!
//! This crate owns everything that runs *inside* one core's tick — the job pool and its RAII
//! handles, the sorted queues, the demand-bound slack/admission math, DVFS/DPM level selection,
//! push-based migration, and the `run_tick` orchestration that ties them together once per
//! logical tick. Cross-core transport (UDP multicast) and thread/process orchestration live in
//! separate crates; this one assumes its `ProcessorState`/`CoreState` are already shared the
//! right way and just drives the pipeline.

pub mod core_state;
pub mod delegation;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod job;
pub mod migration;
pub mod pool;
pub mod power;
pub mod processor_state;
pub mod queue;
pub mod slack;

pub use core_state::{CoreLocal, CoreState, CoreSummary, DpmState, QueueSet};
pub use dispatcher::{
    AllocatedTask, CompletionBroadcast, CoreContext, CriticalityBroadcast, DeadlineMiss, TickReport,
};
pub use error::RecoverableCondition;
pub use handle::JobRef;
pub use job::{CoreId, JobData, JobDemandView, JobState};
pub use migration::{DelegationAck, DelegationOffer, MigrationRequest};
pub use pool::{JobPool, PoolExhausted};
pub use processor_state::{CompletionRecord, ProcessorState};
pub use queue::JobQueue;
