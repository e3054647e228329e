//! Thread-per-core orchestration for one processor process (§5, §6).
//!
//! Everything in `rt-core` assumes its `ProcessorState`/`CoreState` are already shared the right
//! way across real OS threads; this crate is where that sharing actually happens. One
//! [`ProcessorRuntime`] owns one processor's worth of core worker threads plus a single timer
//! thread, and drives the two-barrier tick protocol (§5) that keeps them all in lockstep:
//! every core finishes its own tick pipeline, all of them (plus the timer) rendezvous at
//! `core_completion_barrier`, the timer alone does cross-tick cleanup (harvesting completions,
//! releasing expired cross-core discards, advancing the tick), and everyone rendezvous again at
//! `time_sync_barrier` before the next tick begins.
//!
//! A participant only ever decides to stop looping by checking
//! [`ProcessorState::is_shutting_down`] right after `time_sync_barrier` releases it — never
//! before a barrier call — since skipping a barrier wait based on an earlier check would leave
//! the other parties waiting on a barrier whose party count never completes.

pub mod error;

use error::Error;
use rt_config::{SchedulerConfig, TaskId};
use rt_core::dispatcher::{self, CoreContext};
use rt_core::{CoreLocal, CoreState, ProcessorState};
use rt_transport::{Packet, Transport};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::warn;

/// Why a processor's run ended.
#[derive(Debug, Clone, Copy)]
pub enum RunOutcome {
    /// Every core thread ran to completion (or the tick budget ran out) with no fatal condition.
    Clean,
    /// A core thread observed a running job past its actual deadline (§7, the only fatal
    /// per-tick condition).
    DeadlineMiss {
        /// The core that observed the miss.
        core_id: u32,
        /// The task whose job missed.
        task_id: TaskId,
        /// The job's arrival instant.
        arrival_tick: u64,
        /// The tick the miss was observed at.
        tick: u64,
    },
}

/// Everything needed to run one processor's worth of core worker threads plus its timer thread.
pub struct ProcessorRuntime {
    processor_id: u32,
    processor: Arc<ProcessorState>,
    cores: Vec<Arc<CoreState>>,
    contexts: Vec<CoreContext>,
    transport: Arc<Transport>,
}

impl ProcessorRuntime {
    /// Build the per-processor state, per-core state, and per-core static contexts from
    /// `config`, ready to hand to [`ProcessorRuntime::run`].
    #[must_use]
    pub fn new(processor_id: u32, config: &SchedulerConfig, transport: Transport) -> Self {
        let num_cores = config.limits.num_cores_per_proc as usize;
        let inbox_capacity = config.limits.jobs_per_core.max(3);
        let completion_ring_capacity = (config.limits.jobs_per_core * num_cores.max(1)).max(8);

        let processor = Arc::new(ProcessorState::new(processor_id, num_cores, completion_ring_capacity));

        let cores: Vec<Arc<CoreState>> = (0..num_cores)
            .map(|core_id| {
                Arc::new(CoreState::new(
                    processor_id,
                    core_id as u32,
                    config.limits.jobs_per_core,
                    inbox_capacity,
                    inbox_capacity,
                ))
            })
            .collect();

        let contexts: Vec<CoreContext> = (0..num_cores)
            .map(|core_id| {
                let allocations = config
                    .allocations_for_core(processor_id, core_id as u32)
                    .filter_map(|entry| {
                        config
                            .find_task_by_id(entry.task_id)
                            .map(|task| dispatcher::AllocatedTask::from_task_and_entry(task, entry))
                    })
                    .collect();
                CoreContext {
                    allocations,
                    limits: config.limits,
                    migration: config.migration,
                    dpm_thresholds: config.dpm,
                    dvfs: config.dvfs.clone(),
                }
            })
            .collect();

        Self { processor_id, processor, cores, contexts, transport: Arc::new(transport) }
    }

    /// Spawn the core worker threads and the timer thread, and block until the run ends: either
    /// `num_ticks` ticks have elapsed (if given) or a fatal deadline miss requested shutdown.
    pub fn run(self, num_ticks: Option<u64>) -> Result<RunOutcome, Error> {
        let num_cores = self.cores.len();
        let affinity_ids = core_affinity::get_core_ids().unwrap_or_default();
        let deadline_slot: Arc<Mutex<Option<(u32, rt_core::DeadlineMiss)>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::with_capacity(num_cores + 1);

        for core_index in 0..num_cores {
            let processor = Arc::clone(&self.processor);
            let shared = Arc::clone(&self.cores[core_index]);
            let ctx = self.contexts[core_index].clone();
            let siblings: Vec<Arc<CoreState>> = self
                .cores
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != core_index)
                .map(|(_, c)| Arc::clone(c))
                .collect();
            let transport = Arc::clone(&self.transport);
            let deadline_slot = Arc::clone(&deadline_slot);
            let affinity_id = affinity_ids.get(core_index % affinity_ids.len().max(1)).copied();
            let thread_name = format!("core-{}-{core_index}", self.processor_id);
            let seed = seed_for(self.processor_id, core_index as u32);

            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    if let Some(id) = affinity_id {
                        if !core_affinity::set_for_current(id) {
                            warn!(core = core_index, "failed to set core affinity, continuing unpinned");
                        }
                    }
                    let mut local = CoreLocal::new(seed);
                    core_worker_loop(&processor, &shared, &mut local, &ctx, &siblings, &transport, &deadline_slot);
                })
                .map_err(|source| Error::ThreadSpawnError { thread_name, source })?;
            handles.push(handle);
        }

        {
            let processor = Arc::clone(&self.processor);
            let transport = Arc::clone(&self.transport);
            let thread_name = format!("timer-{}", self.processor_id);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || timer_loop(&processor, &transport, num_ticks))
                .map_err(|source| Error::ThreadSpawnError { thread_name, source })?;
            handles.push(handle);
        }

        for handle in handles {
            let thread_name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            handle.join().map_err(|panic| Error::ThreadPanic {
                thread_name,
                panic_message: panic_message(&panic),
            })?;
        }

        match *deadline_slot.lock().expect("deadline slot mutex poisoned") {
            Some((core_id, miss)) => Ok(RunOutcome::DeadlineMiss {
                core_id,
                task_id: miss.task_id,
                arrival_tick: miss.arrival_tick,
                tick: miss.tick,
            }),
            None => Ok(RunOutcome::Clean),
        }
    }
}

fn seed_for(processor_id: u32, core_id: u32) -> u64 {
    (u64::from(processor_id) << 32) | u64::from(core_id)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// One core worker thread's whole lifetime: run the tick pipeline, sweep donor/delegation
/// protocols against its siblings, then rendezvous at both barriers before looping.
fn core_worker_loop(
    processor: &Arc<ProcessorState>,
    shared: &Arc<CoreState>,
    local: &mut CoreLocal,
    ctx: &CoreContext,
    siblings: &[Arc<CoreState>],
    transport: &Transport,
    deadline_slot: &Mutex<Option<(u32, rt_core::DeadlineMiss)>>,
) {
    loop {
        let report = dispatcher::run_tick(processor, shared, local, ctx);

        if let Some(miss) = report.deadline_miss {
            let mut slot = deadline_slot.lock().expect("deadline slot mutex poisoned");
            if slot.is_none() {
                *slot = Some((shared.core_id, miss));
            }
        }
        for broadcast in &report.criticality_broadcasts {
            transport.broadcast_criticality(broadcast.level);
        }

        let now = processor.tick();
        dispatcher::attempt_donor_offers(shared, local, ctx, siblings, now);
        dispatcher::attempt_donor_delegation(shared, local, ctx, siblings, now);
        dispatcher::migration_receive(shared, local, ctx, siblings, now);
        dispatcher::receive_delegation_offers(shared, local, ctx, siblings);
        dispatcher::process_delegation_acks(shared, local);

        processor.core_completion_barrier.wait();
        processor.time_sync_barrier.wait();
        if processor.is_shutting_down() {
            break;
        }
    }
}

/// The timer thread: releases every core's tick by advancing the clock, harvests completions
/// to and from the transport layer, and sweeps expired cross-core discards (§5).
fn timer_loop(processor: &Arc<ProcessorState>, transport: &Transport, num_ticks: Option<u64>) {
    loop {
        processor.core_completion_barrier.wait();

        ingest_network_packets(processor, transport);
        harvest_completion_snapshot(processor);
        publish_outgoing_completions(processor, transport);
        release_expired_cross_core_discards(processor);

        processor.advance_tick();
        if let Some(limit) = num_ticks {
            if processor.tick() >= limit {
                processor.request_shutdown();
            }
        }

        processor.time_sync_barrier.wait();
        if processor.is_shutting_down() {
            break;
        }
    }
}

fn ingest_network_packets(processor: &ProcessorState, transport: &Transport) {
    for packet in transport.poll_incoming() {
        match packet {
            Packet::Completion { task_id, arrival_tick, system_tick } => {
                let record = rt_core::CompletionRecord {
                    task_id: TaskId(task_id),
                    arrival_tick: u64::from(arrival_tick),
                    system_tick: u64::from(system_tick),
                };
                use rt_ring::EnqueueOutcome;
                if let EnqueueOutcome::Full(_) | EnqueueOutcome::Contended(_) =
                    processor.completion_incoming.try_enqueue(record)
                {
                    warn!("completion_incoming ring full, dropping inbound completion");
                }
            }
            Packet::CriticalityChange { level } => {
                processor.raise_global_criticality(level);
            }
        }
    }
}

/// Drain whatever accumulated on `completion_incoming` this round and publish it as the set
/// cores will see starting next tick (§5: "visible ... at tick t+1").
fn harvest_completion_snapshot(processor: &ProcessorState) {
    use rt_ring::DequeueOutcome;
    let mut records = Vec::new();
    loop {
        match processor.completion_incoming.try_dequeue() {
            DequeueOutcome::Dequeued(record) => records.push(record),
            DequeueOutcome::Empty => break,
            DequeueOutcome::Contended => continue,
        }
    }
    processor.publish_completion_snapshot(records);
}

fn publish_outgoing_completions(processor: &ProcessorState, transport: &Transport) {
    use rt_ring::DequeueOutcome;
    loop {
        match processor.completion_outgoing.try_dequeue() {
            DequeueOutcome::Dequeued(record) => {
                transport.send_completion(record.task_id, record.arrival_tick, record.system_tick);
            }
            DequeueOutcome::Empty => break,
            DequeueOutcome::Contended => continue,
        }
    }
}

/// Release cross-core discard entries whose actual deadline has already passed without being
/// reclaimed by any core on this processor; a non-fatal, WARN-logged condition (§5, §7).
fn release_expired_cross_core_discards(processor: &ProcessorState) {
    let now = processor.tick();
    let expired = {
        let mut discard = processor.cross_core_discard.lock();
        discard.drain_matching(|job| job.data().actual_deadline < now)
    };
    if !expired.is_empty() {
        warn!(count = expired.len(), "releasing expired cross-core discard jobs");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_differ_per_core() {
        assert_ne!(seed_for(0, 0), seed_for(0, 1));
        assert_ne!(seed_for(0, 0), seed_for(1, 0));
    }
}
