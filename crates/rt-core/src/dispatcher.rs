//! The per-core tick pipeline (§4.5).

use crate::core_state::{CoreLocal, CoreState, DpmState};
use crate::error::RecoverableCondition;
use crate::handle::JobRef;
use crate::job::{JobData, JobDemandView, JobState};
use crate::migration::{self, DelegationAck, DelegationOffer, DelegationReceiveOutcome, ReceiveOutcome};
use crate::power::{self, DvfsDecision};
use crate::processor_state::ProcessorState;
use crate::slack::{self, CoreAllocation};
use rand::Rng;
use rt_config::{AllocationRole, CriticalityLevel, MigrationConfig, SystemLimits, Task, TaskId, MAX_CRITICALITY_LEVELS};
use rt_ring::{DequeueOutcome, EnqueueOutcome};
use std::sync::Arc;
use tracing::{info, warn};

/// A task statically allocated to this core, flattened from the config tables once at startup
/// so the hot path never re-walks `SchedulerConfig` (§4.8 `find_task_by_id` is still used once,
/// at construction time).
#[derive(Debug, Clone)]
pub struct AllocatedTask {
    /// The allocated task's id.
    pub task_id: TaskId,
    /// Primary or replica placement.
    pub role: AllocationRole,
    /// Period between arrivals.
    pub period: u32,
    /// The task's own (untuned) relative deadline, for `actual_deadline`.
    pub relative_deadline: u32,
    /// The task's own declared criticality.
    pub task_criticality: CriticalityLevel,
    /// WCET at each criticality level.
    pub wcet: [u32; MAX_CRITICALITY_LEVELS],
    /// Tuned relative deadline at each criticality level, from the allocation entry.
    pub tuned_deadline: [u32; MAX_CRITICALITY_LEVELS],
}

impl AllocatedTask {
    /// Build the flattened view from a task and one of its allocation entries.
    #[must_use]
    pub fn from_task_and_entry(task: &Task, entry: &rt_config::AllocationEntry) -> Self {
        Self {
            task_id: task.id,
            role: entry.role,
            period: task.period,
            relative_deadline: task.relative_deadline,
            task_criticality: task.criticality,
            wcet: task.wcet,
            tuned_deadline: entry.tuned_deadline,
        }
    }

    fn demand_view(&self) -> CoreAllocation {
        CoreAllocation {
            period: self.period,
            task_criticality: self.task_criticality,
            wcet: self.wcet,
            tuned_deadline: self.tuned_deadline,
        }
    }
}

/// Raised when a running job passes its actual deadline (§4.5 step 3, §7). The only
/// unrecoverable condition in the system; the caller must set the processor's shutdown flag.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineMiss {
    /// The task whose job missed its deadline.
    pub task_id: TaskId,
    /// The arrival instant of the job that missed.
    pub arrival_tick: u64,
    /// The tick the miss was observed at.
    pub tick: u64,
}

/// A criticality-change broadcast to hand to the transport layer.
#[derive(Debug, Clone, Copy)]
pub struct CriticalityBroadcast {
    /// The new level to broadcast.
    pub level: CriticalityLevel,
}

/// A completion broadcast to hand to the transport layer.
#[derive(Debug, Clone, Copy)]
pub struct CompletionBroadcast {
    /// The task that completed.
    pub task_id: TaskId,
    /// Its arrival instant.
    pub arrival_tick: u64,
}

/// Everything a single `run_tick` call may need to report back to its caller (the core worker
/// thread, which forwards broadcasts to the transport layer and fatal misses to shutdown).
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Set if this tick observed a fatal deadline miss.
    pub deadline_miss: Option<DeadlineMiss>,
    /// Criticality-change broadcasts to send this tick.
    pub criticality_broadcasts: Vec<CriticalityBroadcast>,
    /// Completion broadcasts to send this tick.
    pub completion_broadcasts: Vec<CompletionBroadcast>,
}

/// Static, read-only context every tick step needs: this core's view of the allocation table,
/// the sizing limits, and the tunables.
#[derive(Clone)]
pub struct CoreContext {
    /// Tasks (primary or replica) statically allocated to this core.
    pub allocations: Vec<AllocatedTask>,
    /// Sizing/admission limits.
    pub limits: SystemLimits,
    /// Migration tunables.
    pub migration: MigrationConfig,
    /// DPM tunables.
    pub dpm_thresholds: rt_config::DpmThresholds,
    /// DVFS table.
    pub dvfs: rt_config::DvfsTable,
}

impl CoreContext {
    fn demand_views(&self) -> Vec<CoreAllocation> {
        self.allocations.iter().map(AllocatedTask::demand_view).collect()
    }
}

/// Snapshot every job currently on this core (running, ready, replica, pending) as
/// [`JobDemandView`]s, for passing into [`slack::find_slack`]/[`slack::is_admissible`] without
/// holding the queue lock across the computation.
fn snapshot_core_jobs(shared: &CoreState, local: &CoreLocal) -> Vec<JobDemandView> {
    let mut views = Vec::new();
    if let Some(running) = local.running.as_ref() {
        views.push(JobDemandView::from(running.data()));
    }
    for job in local.pending.iter() {
        views.push(JobDemandView::from(job.data()));
    }
    let queues = shared.queues.lock();
    for job in queues.ready.iter() {
        views.push(JobDemandView::from(job.data()));
    }
    for job in queues.replica.iter() {
        views.push(JobDemandView::from(job.data()));
    }
    views
}

/// Run one tick of the pipeline for a single core. Returns a report of anything the caller
/// needs to act on outside this core (fatal shutdown, outbound broadcasts).
///
/// Step 7 (migration receive) is not run from here: finishing an accepted offer needs to reach
/// back into the donor's own queue, which this function has no visibility of siblings to do.
/// The caller runs [`migration_receive`] as a separate step instead, the same way it already
/// runs [`receive_delegation_offers`] outside of this pipeline.
pub fn run_tick(
    processor: &ProcessorState,
    shared: &Arc<CoreState>,
    local: &mut CoreLocal,
    ctx: &CoreContext,
) -> TickReport {
    let now = processor.tick();
    let mut report = TickReport::default();

    mode_change_sync(processor, shared, local);

    if local.dpm.active {
        if !dpm_exit_due(&local.dpm, now) {
            return report;
        }
        local.dpm.active = false;
        local.dpm.end_tick = None;
    }

    running_job_progress(processor, shared, local, ctx, now, &mut report);
    if report.deadline_miss.is_some() {
        return report;
    }

    process_arrivals(shared, local, ctx, now);
    remove_completed_siblings(processor, shared, local, now);
    discard_reclaim(processor, shared, local, ctx, now);
    select_and_dispatch(shared, local, now);
    power_decisions(shared, local, ctx, now);
    publish_summary(shared, local, ctx, now);

    report
}

fn dpm_exit_due(dpm: &DpmState, now: u64) -> bool {
    match dpm.end_tick {
        Some(end) => end <= now,
        None => false,
    }
}

/// Step 1: mode-change sync. Idempotent: a core that already adopted the current global level
/// returns immediately.
fn mode_change_sync(processor: &ProcessorState, shared: &Arc<CoreState>, local: &mut CoreLocal) {
    let global = processor.global_criticality();
    if local.local_criticality >= global {
        return;
    }
    local.local_criticality = global;

    if let Some(running) = local.running.take() {
        running.data_mut().retune(global);
        running.data_mut().state = JobState::Ready;
        let mut queues = shared.queues.lock();
        if running.data().is_replica {
            queues.replica.add_to_queue_sorted(running);
        } else {
            queues.ready.add_to_queue_sorted(running);
        }
    }

    let mut queues = shared.queues.lock();
    for q in [&mut queues.ready, &mut queues.replica] {
        let items = q.drain_all();
        for job in items {
            job.data_mut().retune(global);
            q.add_to_queue_sorted(job);
        }
    }
    let demoted_ready = queues
        .ready
        .drain_matching(|j| j.data().task_criticality < global && !j.data().is_being_offered());
    let demoted_replica = queues
        .replica
        .drain_matching(|j| j.data().task_criticality < global && !j.data().is_being_offered());
    for job in demoted_ready.into_iter().chain(demoted_replica) {
        queues.discard.add_to_queue_sorted(job);
    }
    drop(queues);

    local.decision_point = true;
}

/// Step 3: running-job progress, completion, and WCET-overrun mode change.
fn running_job_progress(
    processor: &ProcessorState,
    shared: &Arc<CoreState>,
    local: &mut CoreLocal,
    ctx: &CoreContext,
    now: u64,
    report: &mut TickReport,
) {
    let Some(running) = local.running.as_ref() else {
        return;
    };

    let scale = ctx.dvfs.levels[local.dvfs_level_index].scaling_factor;
    running.data_mut().progress(scale);

    if now > running.data().actual_deadline {
        report.deadline_miss = Some(DeadlineMiss {
            task_id: running.data().task_id,
            arrival_tick: running.data().arrival_tick,
            tick: now,
        });
        processor.request_shutdown();
        return;
    }

    if running.data().is_complete() {
        let task_id = running.data().task_id;
        let arrival_tick = running.data().arrival_tick;
        report.completion_broadcasts.push(CompletionBroadcast { task_id, arrival_tick });
        let outgoing = crate::processor_state::CompletionRecord { task_id, arrival_tick, system_tick: now };
        if let EnqueueOutcome::Full(rec) | EnqueueOutcome::Contended(rec) =
            processor.completion_outgoing.try_enqueue(outgoing)
        {
            warn!(
                core = shared.core_id,
                task = %rec.task_id,
                "{}",
                RecoverableCondition::RingFull { ring: "completion_outgoing", core_id: shared.core_id, item: "completion" }
            );
        }
        local.running = None;
        return;
    }

    if running.data().has_overrun_wcet() {
        let executed = running.data().executed_time;
        let mut new_level = local.local_criticality + 1;
        while (new_level as usize) < MAX_CRITICALITY_LEVELS
            && f64::from(running.data().wcet[new_level as usize]) <= executed
        {
            new_level += 1;
        }
        let new_level = new_level.min((MAX_CRITICALITY_LEVELS - 1) as CriticalityLevel);
        report.criticality_broadcasts.push(CriticalityBroadcast { level: new_level });
        processor.raise_global_criticality(new_level);
        mode_change_sync(processor, shared, local);
    }
}

/// Step 4: arrivals.
fn process_arrivals(shared: &Arc<CoreState>, local: &mut CoreLocal, ctx: &CoreContext, now: u64) {
    local.delegated.release_stale(now);

    let due_pending: Vec<JobRef> = local.pending.drain_matching(|j| j.data().arrival_tick <= now);
    for job in due_pending {
        route_new_job(shared, job, local.local_criticality);
    }

    for alloc in &ctx.allocations {
        let period = u64::from(alloc.period.max(1));
        if now % period != 0 {
            continue;
        }
        if local.delegated.is_delegated(alloc.task_id, now) {
            continue;
        }
        materialize_job(shared, local, alloc, now);
    }
}

fn materialize_job(shared: &Arc<CoreState>, local: &mut CoreLocal, alloc: &AllocatedTask, now: u64) {
    let acet = sample_acet(&mut local.rng, alloc.wcet[alloc.task_criticality as usize]);
    let data = JobData::new(
        alloc.task_id,
        alloc.task_criticality,
        now,
        alloc.relative_deadline,
        alloc.tuned_deadline,
        alloc.wcet,
        acet,
        alloc.role.is_replica(),
        shared.core_id,
        local.local_criticality,
    );
    match shared.pool.alloc(data) {
        Ok(index) => {
            let job_ref = JobRef::from_owned_index(Arc::clone(&shared.pool), index, shared.core_id);
            route_new_job(shared, job_ref, local.local_criticality);
        }
        Err(_) => {
            warn!(
                "{}",
                RecoverableCondition::PoolExhausted { core_id: shared.core_id, task_id: alloc.task_id }
            );
        }
    }
}

/// Sample an actual-case execution time uniformly in `[1, wcet]`, never exceeding it (§10.3).
fn sample_acet(rng: &mut impl Rng, wcet: u32) -> u32 {
    if wcet <= 1 {
        wcet.max(1)
    } else {
        rng.gen_range(1..=wcet)
    }
}

/// Route a freshly materialized or reclaimed-from-pending job into ready/replica, or straight to
/// discard if its task no longer meets the core's current criticality bar (§4.5 step 4).
fn route_new_job(shared: &Arc<CoreState>, job: JobRef, local_criticality: CriticalityLevel) {
    job.data_mut().state = JobState::Ready;
    let mut queues = shared.queues.lock();
    if job.data().task_criticality < local_criticality {
        queues.discard.add_to_queue_sorted(job);
        return;
    }
    if job.data().is_replica {
        queues.replica.add_to_queue_sorted(job);
    } else {
        queues.ready.add_to_queue_sorted(job);
    }
}

/// Step 5: remove completed siblings.
fn remove_completed_siblings(processor: &ProcessorState, shared: &Arc<CoreState>, local: &mut CoreLocal, _now: u64) {
    let snapshot = processor.completion_snapshot();
    if snapshot.is_empty() {
        return;
    }
    let mut queues = shared.queues.lock();
    for completion in &snapshot {
        if queues
            .ready
            .remove_by_task_and_arrival(completion.task_id, completion.arrival_tick)
            .is_some()
        {
            continue;
        }
        if queues
            .replica
            .remove_by_task_and_arrival(completion.task_id, completion.arrival_tick)
            .is_some()
        {
            continue;
        }
        if let Some(running) = local.running.as_ref() {
            if running.data().task_id == completion.task_id && running.data().arrival_tick == completion.arrival_tick
            {
                local.running = None;
            }
        }
    }
}

/// Step 6: discard reclaim (local and cross-core).
fn discard_reclaim(
    processor: &ProcessorState,
    shared: &Arc<CoreState>,
    local: &mut CoreLocal,
    ctx: &CoreContext,
    _now: u64,
) {
    let demand_views = ctx.demand_views();
    let slack_margin = f64::from(ctx.limits.slack_margin_ticks);
    let horizon_cap = u64::from(ctx.limits.horizon_cap_ticks);

    let local_discard: Vec<JobRef> = {
        let mut queues = shared.queues.lock();
        queues.discard.drain_all()
    };

    for job in local_discard {
        let jobs_snapshot = snapshot_core_jobs(shared, local);
        let candidate = JobDemandView::from(job.data());
        let admissible = slack::is_admissible(
            &jobs_snapshot,
            &demand_views,
            local.local_criticality,
            &candidate,
            slack_margin,
            0.0,
            horizon_cap,
        );
        if admissible {
            local.decision_point = true;
            route_ready_or_replica(shared, job);
        } else if !job.data().is_being_offered() {
            job.data_mut().virtual_deadline = job.data().actual_deadline;
            processor.cross_core_discard.lock().add_to_queue_sorted(job);
        } else {
            shared.queues.lock().discard.add_to_queue_sorted(job);
        }
    }

    let penalty = f64::from(ctx.migration.migration_penalty_ticks);
    let jobs_snapshot = snapshot_core_jobs(shared, local);
    let reclaimable: Vec<JobRef> = {
        let mut cross = processor.cross_core_discard.lock();
        cross.drain_matching(|job| {
            let candidate = JobDemandView::from(job.data());
            slack::is_admissible(
                &jobs_snapshot,
                &demand_views,
                local.local_criticality,
                &candidate,
                slack_margin,
                penalty,
                horizon_cap,
            )
        })
    };
    for job in reclaimable {
        local.decision_point = true;
        route_ready_or_replica(shared, job);
    }
}

/// Insert a reclaimed/accepted job directly into ready or replica, bypassing the
/// arrival-time discard check (the caller already confirmed admissibility).
fn route_ready_or_replica(shared: &Arc<CoreState>, job: JobRef) {
    job.data_mut().state = JobState::Ready;
    let mut queues = shared.queues.lock();
    if job.data().is_replica {
        queues.replica.add_to_queue_sorted(job);
    } else {
        queues.ready.add_to_queue_sorted(job);
    }
}

/// Step 7: migration receive. A separate entry point from `run_tick`, like
/// [`receive_delegation_offers`]: finishing an acceptance needs `siblings` to reach back into
/// the donor's queue and detach the original there (§4.7 step 4).
pub fn migration_receive(
    shared: &Arc<CoreState>,
    local: &mut CoreLocal,
    ctx: &CoreContext,
    siblings: &[Arc<CoreState>],
    now: u64,
) {
    let demand_views = ctx.demand_views();
    let slack_margin = f64::from(ctx.limits.slack_margin_ticks);
    let penalty = f64::from(ctx.migration.migration_penalty_ticks);
    let horizon_cap = u64::from(ctx.limits.horizon_cap_ticks);
    let cooldown = u64::from(ctx.migration.job_migration_cooldown_ticks);

    loop {
        let jobs_snapshot = snapshot_core_jobs(shared, local);
        let outcome = migration::receive_migration_offer(
            shared,
            &demand_views,
            &jobs_snapshot,
            local.local_criticality,
            slack_margin,
            penalty,
            horizon_cap,
        );
        match outcome {
            ReceiveOutcome::Empty | ReceiveOutcome::Contended => break,
            ReceiveOutcome::Rejected { task_id, arrival_tick, from_core } => {
                if let Some(donor) = siblings.iter().find(|s| s.core_id == from_core) {
                    migration::finish_rejection(donor, task_id, arrival_tick);
                }
            }
            ReceiveOutcome::Accepted { job, from_core } => {
                let Some(donor) = siblings.iter().find(|s| s.core_id == from_core) else {
                    continue;
                };
                migration::finish_acceptance(donor, shared, job, now, cooldown);
            }
        }
    }
}

/// Step 8: select and dispatch.
fn select_and_dispatch(shared: &Arc<CoreState>, local: &mut CoreLocal, _now: u64) {
    let candidate_deadline = {
        let queues = shared.queues.lock();
        let ready_head = queues.ready.peek().map(|j| j.data().virtual_deadline);
        let replica_head = queues.replica.peek().map(|j| j.data().virtual_deadline);
        match (ready_head, replica_head) {
            (Some(r), Some(p)) => Some((r <= p, if r <= p { r } else { p })),
            (Some(r), None) => Some((false, r)),
            (None, Some(p)) => Some((true, p)),
            (None, None) => None,
        }
    };
    let Some((from_replica, candidate_deadline)) = candidate_deadline else {
        return;
    };

    let should_preempt = match local.running.as_ref() {
        None => true,
        Some(running) => running.data().virtual_deadline > candidate_deadline,
    };
    if !should_preempt {
        return;
    }

    let mut queues = shared.queues.lock();
    let next = if from_replica { queues.replica.pop() } else { queues.ready.pop() };
    drop(queues);
    let Some(next) = next else { return };

    if let Some(previous) = local.running.take() {
        previous.data_mut().state = JobState::Ready;
        let mut queues = shared.queues.lock();
        if previous.data().is_replica {
            queues.replica.add_to_queue_sorted(previous);
        } else {
            queues.ready.add_to_queue_sorted(previous);
        }
    }
    next.data_mut().state = JobState::Running;
    local.running = Some(next);
}

/// Step 9: power decisions.
fn power_decisions(shared: &Arc<CoreState>, local: &mut CoreLocal, ctx: &CoreContext, now: u64) {
    let demand_views = ctx.demand_views();
    let horizon_cap = u64::from(ctx.limits.horizon_cap_ticks);
    let max_level = (MAX_CRITICALITY_LEVELS - 1) as CriticalityLevel;
    let jobs_snapshot = snapshot_core_jobs(shared, local);

    if local.running.is_some() {
        let mut min_slack_cur_scale = f64::INFINITY;
        for level in local.local_criticality..=max_level {
            let slack = slack::find_slack(&jobs_snapshot, &demand_views, level, now, 1.0, None, horizon_cap);
            min_slack_cur_scale = min_slack_cur_scale.min(slack);
        }

        let lowest_scale = ctx.dvfs.levels[ctx.dvfs.slowest_index()].scaling_factor;
        let mut min_slack_lowest_scale = f64::INFINITY;
        for level in local.local_criticality..=max_level {
            let slack = slack::find_slack(&jobs_snapshot, &demand_views, level, now, lowest_scale, None, horizon_cap);
            min_slack_lowest_scale = min_slack_lowest_scale.min(slack);
        }

        let next_arrival = next_effective_arrival(ctx, local, now);
        if let Some(interval) = power::should_procrastinate(
            min_slack_lowest_scale,
            next_arrival,
            u64::from(ctx.dpm_thresholds.idle_threshold_ticks),
            u64::from(ctx.dpm_thresholds.entry_latency_ticks),
            u64::from(ctx.dpm_thresholds.exit_latency_ticks),
        ) {
            if let Some(running) = local.running.take() {
                running.data_mut().state = JobState::Ready;
                let mut queues = shared.queues.lock();
                if running.data().is_replica {
                    queues.replica.add_to_queue_sorted(running);
                } else {
                    queues.ready.add_to_queue_sorted(running);
                }
            }
            local.dpm = DpmState {
                active: true,
                start_tick: now,
                end_tick: if interval.indefinite { None } else { Some(now + interval.duration_ticks) },
            };
            info!(core = shared.core_id, tick = now, "procrastinating, entering DPM");
        } else if local.decision_point {
            if let Some(running) = local.running.as_ref() {
                let remaining_hi = running.data().remaining_wcet_at(max_level);
                let decision: DvfsDecision = power::select_dvfs_level(&ctx.dvfs, remaining_hi, min_slack_cur_scale);
                local.dvfs_level_index = decision.level_index;
            }
            local.decision_point = false;
        }
        return;
    }

    let idle = {
        let queues = shared.queues.lock();
        queues.ready.is_empty() && queues.replica.is_empty()
    };
    if idle {
        local.dvfs_level_index = ctx.dvfs.slowest_index();
        let next_arrival = next_effective_arrival(ctx, local, now);
        if let Some(interval) = power::plan_dpm_interval(
            next_arrival,
            u64::from(ctx.dpm_thresholds.idle_threshold_ticks),
            u64::from(ctx.dpm_thresholds.entry_latency_ticks),
            u64::from(ctx.dpm_thresholds.exit_latency_ticks),
        ) {
            local.dpm = DpmState {
                active: true,
                start_tick: now,
                end_tick: if interval.indefinite { None } else { Some(now + interval.duration_ticks) },
            };
        }
    }
}

fn next_effective_arrival(ctx: &CoreContext, local: &CoreLocal, now: u64) -> Option<u64> {
    let mut best: Option<u64> = local.pending.peek().map(|j| j.data().arrival_tick.saturating_sub(now));
    for alloc in &ctx.allocations {
        let period = u64::from(alloc.period.max(1));
        let next = ((now / period) + 1) * period;
        let delta = next - now;
        best = Some(best.map_or(delta, |b| b.min(delta)));
    }
    best
}

/// Step 10: publish summary.
fn publish_summary(shared: &Arc<CoreState>, local: &CoreLocal, ctx: &CoreContext, now: u64) {
    let demand_views = ctx.demand_views();
    let horizon_cap = u64::from(ctx.limits.horizon_cap_ticks);
    let jobs_snapshot = snapshot_core_jobs(shared, local);
    let slack = slack::find_slack(
        &jobs_snapshot,
        &demand_views,
        local.local_criticality,
        now,
        1.0,
        None,
        horizon_cap,
    );

    let (ready_len, replica_len) = {
        let queues = shared.queues.lock();
        (queues.ready.len(), queues.replica.len())
    };
    let idle = local.running.is_none() && ready_len == 0 && replica_len == 0;
    let capacity = ctx.limits.jobs_per_core.max(1) as f64;
    let utilization = ((ready_len + replica_len + usize::from(local.running.is_some())) as f64 / capacity).min(1.0);

    shared.publish_summary(crate::core_state::CoreSummary {
        utilization,
        slack,
        next_arrival: next_effective_arrival(ctx, local, now),
        idle,
        dvfs_level: local.dvfs_level_index,
    });
}

/// Donor-side migration offer sweep, run by the core's own thread after its normal pipeline
/// (§4.7 "Source-side trigger"); kept as a separate entry point since it needs the *other*
/// cores' `CoreState`s, which `run_tick` does not otherwise touch.
pub fn attempt_donor_offers(
    shared: &Arc<CoreState>,
    local: &mut CoreLocal,
    ctx: &CoreContext,
    destinations: &[Arc<CoreState>],
    now: u64,
) {
    let utilization = shared.read_summary().utilization;
    if !migration::is_eligible_donor(utilization, local.next_donor_eligible_tick, now, &ctx.migration) {
        return;
    }

    let best_destination = destinations
        .iter()
        .filter(|d| migration::is_eligible_destination(d.read_summary().utilization, &ctx.migration))
        .max_by(|a, b| {
            a.read_summary()
                .utilization
                .partial_cmp(&b.read_summary().utilization)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    let Some(dest) = best_destination else { return };

    let mut offered = 0u32;
    while offered < ctx.migration.max_offers_per_tick {
        if !migration::offer_one(shared, dest) {
            break;
        }
        offered += 1;
        local.next_donor_eligible_tick = now + u64::from(ctx.migration.core_migration_cooldown_ticks);
    }
}

/// Donor-side delegation of a *future* arrival when this core is about to idle (§4.7
/// "Source-side trigger": "if empty (about to idle), it can also delegate future arrivals").
///
/// Unlike a current-job offer, no `JobRef` exists yet to hand over; this sends a
/// [`DelegationOffer`] describing the arrival instead. The donor only records the instance as
/// delegated once the destination's ack comes back (§4.7 step 5), via
/// [`process_delegation_acks`] — not here, to avoid skipping a local arrival the destination
/// ultimately rejects.
pub fn attempt_donor_delegation(
    shared: &Arc<CoreState>,
    local: &mut CoreLocal,
    ctx: &CoreContext,
    destinations: &[Arc<CoreState>],
    now: u64,
) {
    let utilization = shared.read_summary().utilization;
    if !migration::is_eligible_donor(utilization, local.next_donor_eligible_tick, now, &ctx.migration) {
        return;
    }
    let empty_queues = {
        let queues = shared.queues.lock();
        queues.ready.is_empty() && queues.replica.is_empty()
    };
    if !empty_queues {
        return;
    }

    let Some(alloc) = ctx.allocations.first() else { return };
    let period = u64::from(alloc.period.max(1));
    let next_arrival = ((now / period) + 1) * period;
    if local.delegated.is_delegated(alloc.task_id, next_arrival) {
        return;
    }

    let best_destination = destinations
        .iter()
        .filter(|d| migration::is_eligible_destination(d.read_summary().utilization, &ctx.migration))
        .max_by(|a, b| {
            a.read_summary()
                .utilization
                .partial_cmp(&b.read_summary().utilization)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

    let Some(destination) = best_destination else { return };

    let offer = DelegationOffer {
        from_core: shared.core_id,
        task_id: alloc.task_id,
        task_criticality: alloc.task_criticality,
        arrival_tick: next_arrival,
        relative_deadline: alloc.relative_deadline,
        tuned_deadline: alloc.tuned_deadline,
        wcet: alloc.wcet,
    };
    if let EnqueueOutcome::Full(_) | EnqueueOutcome::Contended(_) =
        destination.delegation_offer_inbox.try_enqueue(offer)
    {
        warn!(core = shared.core_id, "delegation offer inbox full, dropping offer");
    }
}

/// Destination-side receive of future-arrival delegation offers (§4.7 step 5). A separate entry
/// point from [`migration_receive`] since accepting one requires `siblings` to route the ack
/// back to the source core.
pub fn receive_delegation_offers(
    shared: &Arc<CoreState>,
    local: &mut CoreLocal,
    ctx: &CoreContext,
    siblings: &[Arc<CoreState>],
) {
    let demand_views = ctx.demand_views();
    let slack_margin = f64::from(ctx.limits.slack_margin_ticks);
    let penalty = f64::from(ctx.migration.migration_penalty_ticks);
    let horizon_cap = u64::from(ctx.limits.horizon_cap_ticks);

    loop {
        let jobs_snapshot = snapshot_core_jobs(shared, local);
        let outcome = migration::receive_delegation_offer(
            shared,
            &demand_views,
            &jobs_snapshot,
            local.local_criticality,
            slack_margin,
            penalty,
            horizon_cap,
        );
        let (offer, accepted) = match outcome {
            DelegationReceiveOutcome::Empty | DelegationReceiveOutcome::Contended => break,
            DelegationReceiveOutcome::Accepted { offer } => (offer, true),
            DelegationReceiveOutcome::Rejected { offer } => (offer, false),
        };

        if accepted {
            let acet = sample_acet(&mut local.rng, offer.wcet[offer.task_criticality as usize]);
            let data = JobData::new(
                offer.task_id,
                offer.task_criticality,
                offer.arrival_tick,
                offer.relative_deadline,
                offer.tuned_deadline,
                offer.wcet,
                acet,
                false,
                shared.core_id,
                local.local_criticality,
            );
            match shared.pool.alloc(data) {
                Ok(index) => {
                    let job_ref = JobRef::from_owned_index(Arc::clone(&shared.pool), index, shared.core_id);
                    local.pending.add_to_queue_sorted_by_arrival(job_ref);
                }
                Err(_) => {
                    warn!(
                        "{}",
                        RecoverableCondition::PoolExhausted { core_id: shared.core_id, task_id: offer.task_id }
                    );
                }
            }
        }

        let Some(source) = siblings.iter().find(|s| s.core_id == offer.from_core) else {
            continue;
        };
        let ack = DelegationAck { task_id: offer.task_id, arrival_tick: offer.arrival_tick, accepted };
        if let EnqueueOutcome::Full(_) | EnqueueOutcome::Contended(_) = source.delegation_ack_inbox.try_enqueue(ack) {
            warn!(core = shared.core_id, "delegation ack inbox full on source, dropping ack");
        }
    }
}

/// Source-side processing of delegation acks (§4.7 step 5: the donor only marks an instance
/// `owned_by_remote` once its destination has actually accepted it).
pub fn process_delegation_acks(shared: &Arc<CoreState>, local: &mut CoreLocal) {
    loop {
        match shared.delegation_ack_inbox.try_dequeue() {
            DequeueOutcome::Dequeued(ack) => {
                if ack.accepted {
                    local.delegated.insert(ack.task_id, ack.arrival_tick);
                }
            }
            DequeueOutcome::Empty | DequeueOutcome::Contended => break,
        }
    }
}
