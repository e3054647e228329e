//! Per-core state (§3 "Per-core state"), split along its concurrency boundary.
//!
//! [`CoreState`] holds everything another core's thread may legitimately touch: the
//! ready/replica/discard queues (locked, for migration's double-lock detach-and-insert), the
//! published summary (locked, read by migration's destination selection), and the two lock-free
//! inboxes. [`CoreLocal`] holds everything only the owning tick thread ever touches — `pending`,
//! the `delegated` list, the running slot, DVFS/DPM state, and cooldowns — so it needs no
//! synchronization at all and is simply moved into the core's worker thread.

use crate::delegation::DelegatedList;
use crate::handle::JobRef;
use crate::job::CoreId;
use crate::migration::{DelegationAck, DelegationOffer, MigrationRequest};
use crate::pool::JobPool;
use crate::queue::JobQueue;
use parking_lot::Mutex;
use rand_chacha::ChaCha8Rng;
use rt_config::CriticalityLevel;
use rt_ring::RingBuffer;
use std::sync::Arc;

/// The three lock-protected, criticality-sorted queues a core dispatches from.
#[derive(Default)]
pub struct QueueSet {
    /// Non-replica jobs, sorted by virtual deadline.
    pub ready: JobQueue,
    /// Replica jobs, sorted by virtual deadline.
    pub replica: JobQueue,
    /// Jobs demoted by a mode change, awaiting reclaim or cross-core discard.
    pub discard: JobQueue,
}

/// A core's published status, consulted by migration destination selection under its own lock
/// rather than the owning core's queue lock (§3 "Per-core summary").
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreSummary {
    /// Fraction of capacity currently claimed by queued and running demand.
    pub utilization: f64,
    /// Slack at `now`, at the core's current criticality level.
    pub slack: f64,
    /// Ticks until the next effective arrival, if foreseeable.
    pub next_arrival: Option<u64>,
    /// Whether the core has no running job and empty ready/replica queues.
    pub idle: bool,
    /// The core's current DVFS level index.
    pub dvfs_level: usize,
}

/// The cross-core-visible half of a core's state.
pub struct CoreState {
    /// Owning processor.
    pub processor_id: u32,
    /// This core's id within its processor.
    pub core_id: CoreId,
    /// This core's job slab.
    pub pool: Arc<JobPool>,
    /// Ready/replica/discard, locked for migration's cross-core detach-and-insert.
    pub queues: Mutex<QueueSet>,
    /// Published summary, locked independently of `queues`.
    pub summary: Mutex<CoreSummary>,
    /// Inbox of incoming migration offers (other cores are producers).
    pub migration_inbox: RingBuffer<MigrationRequest>,
    /// Inbox of incoming future-arrival delegation offers (other cores are producers).
    pub delegation_offer_inbox: RingBuffer<DelegationOffer>,
    /// Inbox of delegation acknowledgements (the core this core delegated to is the producer).
    pub delegation_ack_inbox: RingBuffer<DelegationAck>,
}

impl CoreState {
    /// Construct a fresh core state with the given inbox capacities.
    #[must_use]
    pub fn new(
        processor_id: u32,
        core_id: CoreId,
        pool_capacity: usize,
        migration_inbox_capacity: usize,
        delegation_ack_inbox_capacity: usize,
    ) -> Self {
        Self {
            processor_id,
            core_id,
            pool: Arc::new(JobPool::new(core_id, pool_capacity)),
            queues: Mutex::new(QueueSet::default()),
            summary: Mutex::new(CoreSummary::default()),
            migration_inbox: RingBuffer::new(migration_inbox_capacity)
                .expect("migration inbox capacity must be >= 3"),
            delegation_offer_inbox: RingBuffer::new(delegation_ack_inbox_capacity)
                .expect("delegation offer inbox capacity must be >= 3"),
            delegation_ack_inbox: RingBuffer::new(delegation_ack_inbox_capacity)
                .expect("delegation ack inbox capacity must be >= 3"),
        }
    }

    /// Publish a fresh summary, replacing whatever was there.
    pub fn publish_summary(&self, summary: CoreSummary) {
        *self.summary.lock() = summary;
    }

    /// Snapshot the current summary.
    #[must_use]
    pub fn read_summary(&self) -> CoreSummary {
        *self.summary.lock()
    }
}

/// A planned DPM (low-power) interval, tracked on the core's local state (§3 "DPM control
/// block").
#[derive(Debug, Clone, Copy, Default)]
pub struct DpmState {
    /// Whether the core is currently in a low-power state.
    pub active: bool,
    /// Tick the interval began.
    pub start_tick: u64,
    /// Tick the interval ends, or `None` if indefinite (no foreseeable arrival).
    pub end_tick: Option<u64>,
}

/// Everything only the owning tick thread ever reads or mutates.
pub struct CoreLocal {
    /// Future-arrival jobs not yet materialized into ready/replica, sorted by arrival.
    pub pending: JobQueue,
    /// Future arrivals this core has delegated to a remote core.
    pub delegated: DelegatedList,
    /// The job currently occupying the core, if any.
    pub running: Option<JobRef>,
    /// Low-power state tracking.
    pub dpm: DpmState,
    /// This core's adopted criticality level; may lag the processor's global level by one tick.
    pub local_criticality: CriticalityLevel,
    /// Current DVFS level index.
    pub dvfs_level_index: usize,
    /// Tick before which this core may not donate another migration offer.
    pub next_donor_eligible_tick: u64,
    /// Set mid-tick when a criticality or admission change warrants a DVFS/dispatch re-check.
    pub decision_point: bool,
    /// Seeded RNG used only for sampling a job's ACET at arrival (§10.3/§10.5).
    pub rng: ChaCha8Rng,
}

impl CoreLocal {
    /// Construct fresh local state, seeded for reproducible ACET sampling.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            pending: JobQueue::new(),
            delegated: DelegatedList::new(),
            running: None,
            dpm: DpmState::default(),
            local_criticality: 0,
            dvfs_level_index: 0,
            next_donor_eligible_tick: 0,
            decision_point: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}
