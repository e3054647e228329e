//! Push-based migration with destination admission (§4.7).

use crate::core_state::CoreState;
use crate::error::RecoverableCondition;
use crate::handle::JobRef;
use crate::job::{CoreId, JobData, JobDemandView, JobState};
use crate::pool::PoolExhausted;
use crate::queue::JobQueue;
use crate::slack::{is_admissible, CoreAllocation};
use rt_config::{CriticalityLevel, MigrationConfig, TaskId, MAX_CRITICALITY_LEVELS};
use rt_ring::{DequeueOutcome, EnqueueOutcome};
use std::sync::Arc;
use tracing::warn;

/// A migration offer for a *current* job, carried on a destination's migration-request inbox.
///
/// Carries an owned clone of the job's data (§4.2 `clone_job`), not a [`JobRef`] into the
/// donor's pool: the donor's original stays resident and untouched in its own queue for the
/// entire round trip, so a lost offer (CAS race, full inbox, rejected admission) never costs the
/// donor anything. Only [`finish_acceptance`] ever detaches the original, and only once the
/// destination has already materialized the clone into its own pool.
pub struct MigrationRequest {
    /// The offered job's data, cloned off the donor's original.
    pub job: JobData,
    /// The core that made the offer.
    pub from_core: CoreId,
}

/// An acknowledgement of a *future-arrival* delegation, carried back to the donor's inbox.
#[derive(Debug, Clone, Copy)]
pub struct DelegationAck {
    /// The delegated task.
    pub task_id: TaskId,
    /// The specific arrival instant delegated.
    pub arrival_tick: u64,
    /// Whether the destination accepted the delegation.
    pub accepted: bool,
}

/// An offer to execute a *future* (not yet materialized) arrival on behalf of another core
/// (§4.7 "Source-side trigger": "if empty (about to idle), it can also delegate future
/// arrivals"). Carries everything the destination needs to materialize the job itself once its
/// own admission check passes — no `JobRef` exists yet to hand over.
#[derive(Debug, Clone, Copy)]
pub struct DelegationOffer {
    /// The core offering this future arrival.
    pub from_core: CoreId,
    /// The delegated task.
    pub task_id: TaskId,
    /// The task's own declared criticality.
    pub task_criticality: CriticalityLevel,
    /// The specific future arrival instant being delegated.
    pub arrival_tick: u64,
    /// The task's own (untuned) relative deadline.
    pub relative_deadline: u32,
    /// Tuned relative deadlines at each criticality level.
    pub tuned_deadline: [u32; MAX_CRITICALITY_LEVELS],
    /// WCET at each criticality level.
    pub wcet: [u32; MAX_CRITICALITY_LEVELS],
}

impl DelegationOffer {
    fn demand_view(&self) -> JobDemandView {
        JobDemandView {
            arrival_tick: self.arrival_tick,
            tuned_deadline: self.tuned_deadline,
            wcet: self.wcet,
            executed_time: 0.0,
        }
    }
}

/// Source-side donor eligibility (§4.7 "Source-side trigger").
#[must_use]
pub fn is_eligible_donor(utilization: f64, cooldown_tick: u64, now: u64, config: &MigrationConfig) -> bool {
    utilization < config.light_donor_util_threshold && now >= cooldown_tick
}

/// Destination-side eligibility by published utilization alone, before the slack-based
/// admission check (§4.7 "Destination selection").
#[must_use]
pub fn is_eligible_destination(utilization: f64, config: &MigrationConfig) -> bool {
    utilization < config.util_upper_cap
}

/// Offer steps 1–2 (§4.7): scan `shared`'s ready/replica tail for the first job not already out
/// on an offer, CAS-mark it, clone its data (§4.2 `clone_job`), and enqueue the clone on
/// `destination`'s inbox. The original is never popped or moved here — it keeps sitting in
/// `shared`'s queue until [`finish_acceptance`] detaches it, so every non-accept outcome (no
/// offerable candidate, CAS race, full or contended inbox) is a pure no-op on the donor.
pub fn offer_one(shared: &CoreState, destination: &CoreState) -> bool {
    let (clone, task_id, arrival_tick) = {
        let queues = shared.queues.lock();
        let Some(candidate) = find_offerable(&queues.ready).or_else(|| find_offerable(&queues.replica)) else {
            return false;
        };
        if !candidate.data().try_mark_offered() {
            return false;
        }
        let data = candidate.data();
        (data.clone_for_pool(shared.core_id), data.task_id, data.arrival_tick)
    };

    match destination.migration_inbox.try_enqueue(MigrationRequest { job: clone, from_core: shared.core_id }) {
        EnqueueOutcome::Enqueued => true,
        EnqueueOutcome::Full(_) => {
            warn!(core = shared.core_id, "migration inbox full, dropping offer");
            clear_offered_by_identity(shared, task_id, arrival_tick);
            false
        }
        EnqueueOutcome::Contended(_) => {
            warn!(core = shared.core_id, "migration inbox contended, dropping offer");
            clear_offered_by_identity(shared, task_id, arrival_tick);
            false
        }
    }
}

fn find_offerable(queue: &JobQueue) -> Option<&JobRef> {
    queue.iter().rev().find(|j| !j.data().is_being_offered())
}

fn find_by_identity<'a>(queue: &'a JobQueue, task_id: TaskId, arrival_tick: u64) -> Option<&'a JobRef> {
    queue.iter().find(|j| j.data().task_id == task_id && j.data().arrival_tick == arrival_tick)
}

fn clear_offered_by_identity(core: &CoreState, task_id: TaskId, arrival_tick: u64) {
    let queues = core.queues.lock();
    let found = find_by_identity(&queues.ready, task_id, arrival_tick).or_else(|| find_by_identity(&queues.replica, task_id, arrival_tick));
    if let Some(job) = found {
        job.data().clear_offered();
    }
}

/// Destination-side receive step (§4.7 step 3 onward), draining one request from the local
/// inbox and either rejecting it or handing back an acceptance decision for the caller to finish
/// with [`finish_acceptance`]/[`finish_rejection`]. Returns `None` if the inbox was empty.
pub enum ReceiveOutcome {
    /// Nothing to receive this tick.
    Empty,
    /// Ring contention; try again next tick.
    Contended,
    /// Destination rejected the job; caller must clear `being_offered` on the donor's original
    /// via [`finish_rejection`] so it becomes eligible again.
    Rejected {
        /// Identity of the rejected job, to find the original back on the donor.
        task_id: TaskId,
        /// Identity of the rejected job, to find the original back on the donor.
        arrival_tick: u64,
        /// The core that made the offer.
        from_core: CoreId,
    },
    /// Destination accepted; caller must finish the acceptance via [`finish_acceptance`], which
    /// materializes this data into the destination's own pool and detaches the donor's original.
    Accepted { job: JobData, from_core: CoreId },
}

/// Run admission against the job pulled from this core's migration inbox. `destination_jobs` is
/// a snapshot of the destination's own running/ready/replica/pending jobs (see
/// [`crate::job::JobDemandView`]).
pub fn receive_migration_offer(
    destination: &CoreState,
    destination_allocations: &[CoreAllocation],
    destination_jobs: &[crate::job::JobDemandView],
    current_level: u8,
    slack_margin: f64,
    migration_penalty: f64,
    horizon_cap: u64,
) -> ReceiveOutcome {
    let request = match destination.migration_inbox.try_dequeue() {
        DequeueOutcome::Dequeued(r) => r,
        DequeueOutcome::Empty => return ReceiveOutcome::Empty,
        DequeueOutcome::Contended => return ReceiveOutcome::Contended,
    };

    let candidate_view = JobDemandView::from(&request.job);
    let admissible = is_admissible(
        destination_jobs,
        destination_allocations,
        current_level,
        &candidate_view,
        slack_margin,
        migration_penalty,
        horizon_cap,
    );

    if admissible {
        ReceiveOutcome::Accepted {
            job: request.job,
            from_core: request.from_core,
        }
    } else {
        ReceiveOutcome::Rejected {
            task_id: request.job.task_id,
            arrival_tick: request.job.arrival_tick,
            from_core: request.from_core,
        }
    }
}

/// Finish an accepted offer (§4.7 step 4). Allocates the clone into `destination`'s own pool
/// first; only if that succeeds does it take `donor`'s queue lock to detach the original by
/// identity, so a destination-side pool exhaustion never costs the donor its job. If the
/// original is no longer linked on the donor (it completed, was dispatched, or was discarded
/// during the round trip), the freshly-allocated destination copy is dropped instead of
/// double-counting the work. If the destination's own pool is exhausted, the donor's original is
/// still found and un-marked so it remains offerable, rather than left stuck flagged forever.
pub fn finish_acceptance(donor: &CoreState, destination: &CoreState, clone: JobData, now: u64, cooldown_ticks: u64) {
    let task_id = clone.task_id;
    let arrival_tick = clone.arrival_tick;
    let is_replica = clone.is_replica;

    let index = match destination.pool.clone_job(&clone) {
        Ok(index) => index,
        Err(PoolExhausted) => {
            warn!("{}", RecoverableCondition::PoolExhausted { core_id: destination.core_id, task_id });
            clear_offered_by_identity(donor, task_id, arrival_tick);
            return;
        }
    };
    let job = JobRef::from_owned_index(Arc::clone(&destination.pool), index, destination.core_id);

    let still_linked = {
        let mut donor_queues = donor.queues.lock();
        donor_queues.ready.remove_by_task_and_arrival(task_id, arrival_tick).is_some()
            || donor_queues.replica.remove_by_task_and_arrival(task_id, arrival_tick).is_some()
    };

    if !still_linked {
        drop(job);
        return;
    }

    job.data_mut().next_migration_eligible_tick = now + cooldown_ticks;
    job.data_mut().state = JobState::Ready;
    let mut destination_queues = destination.queues.lock();
    if is_replica {
        destination_queues.replica.add_to_queue_sorted(job);
    } else {
        destination_queues.ready.add_to_queue_sorted(job);
    }
}

/// Finish a rejected offer (§4.7 step 3): clear `being_offered` on the donor's original by
/// identity so it is eligible for local dispatch or another offer again.
pub fn finish_rejection(donor: &CoreState, task_id: TaskId, arrival_tick: u64) {
    clear_offered_by_identity(donor, task_id, arrival_tick);
}

/// Outcome of draining one entry from a destination's delegation-offer inbox.
pub enum DelegationReceiveOutcome {
    /// Nothing to receive this tick.
    Empty,
    /// Ring contention; try again next tick.
    Contended,
    /// Destination rejected the delegated arrival.
    Rejected {
        /// The rejected offer, so the caller can ack the source with `accepted: false`.
        offer: DelegationOffer,
    },
    /// Destination accepted; caller must materialize a job for it and insert into `pending`,
    /// then ack the source (§4.7 step 5).
    Accepted {
        /// The accepted offer.
        offer: DelegationOffer,
    },
}

/// Run admission against a future-arrival offer pulled from this core's delegation-offer inbox.
pub fn receive_delegation_offer(
    destination: &CoreState,
    destination_allocations: &[CoreAllocation],
    destination_jobs: &[JobDemandView],
    current_level: CriticalityLevel,
    slack_margin: f64,
    migration_penalty: f64,
    horizon_cap: u64,
) -> DelegationReceiveOutcome {
    let offer = match destination.delegation_offer_inbox.try_dequeue() {
        DequeueOutcome::Dequeued(o) => o,
        DequeueOutcome::Empty => return DelegationReceiveOutcome::Empty,
        DequeueOutcome::Contended => return DelegationReceiveOutcome::Contended,
    };

    let candidate = offer.demand_view();
    let admissible = is_admissible(
        destination_jobs,
        destination_allocations,
        current_level,
        &candidate,
        slack_margin,
        migration_penalty,
        horizon_cap,
    );

    if admissible {
        DelegationReceiveOutcome::Accepted { offer }
    } else {
        DelegationReceiveOutcome::Rejected { offer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_config::MigrationConfig;

    #[test]
    fn donor_eligibility_respects_threshold_and_cooldown() {
        let config = MigrationConfig::default();
        assert!(is_eligible_donor(0.1, 0, 5, &config));
        assert!(!is_eligible_donor(0.5, 0, 5, &config), "utilization too high");
        assert!(!is_eligible_donor(0.1, 10, 5, &config), "cooldown not elapsed");
    }

    #[test]
    fn destination_eligibility_respects_upper_cap() {
        let config = MigrationConfig::default();
        assert!(is_eligible_destination(0.5, &config));
        assert!(!is_eligible_destination(0.9, &config));
    }
}
