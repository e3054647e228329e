//! A job overrunning its level-0 WCET forces a criticality escalation (§8 scenario 2).

use rt_config::{DpmThresholds, DvfsTable, MigrationConfig, SystemLimits, TaskId, CRIT_B, CRIT_C};
use rt_core::dispatcher::CoreContext;
use rt_core::{CoreLocal, CoreState, JobData, JobRef, JobState, ProcessorState};
use std::sync::Arc;

#[test]
fn overrun_escalates_criticality_and_retunes_the_job() {
    let ctx = CoreContext {
        allocations: vec![],
        limits: SystemLimits::default(),
        migration: MigrationConfig::default(),
        dpm_thresholds: DpmThresholds::default(),
        dvfs: DvfsTable::default_table(),
    };

    let processor = ProcessorState::new(0, 1, 16);
    let shared = Arc::new(CoreState::new(0, 0, 8, 4, 4));
    let mut local = CoreLocal::new(1);

    // Task A: own criticality C, WCET escalates from 3 at level 0/1/2 to 4 at level 3, ACET well
    // past that so it never completes during the test.
    let mut running_data = JobData::new(TaskId(1), CRIT_C, 0, 10, [10; 5], [3, 3, 3, 4, 4], 10, false, 0, 0);
    running_data.state = JobState::Running;
    let running_idx = shared.pool.alloc(running_data).unwrap();
    local.running = Some(JobRef::from_owned_index(Arc::clone(&shared.pool), running_idx, 0));

    // Task B: own criticality B, queued, far deadline so it would never preempt A.
    let mut queued_data = JobData::new(TaskId(2), CRIT_B, 0, 20, [20; 5], [2; 5], 2, false, 0, 0);
    queued_data.state = JobState::Ready;
    let queued_idx = shared.pool.alloc(queued_data).unwrap();
    let queued_ref = JobRef::from_owned_index(Arc::clone(&shared.pool), queued_idx, 0);
    shared.queues.lock().ready.add_to_queue_sorted(queued_ref);

    let mut last_report = None;
    for _ in 0..3 {
        last_report = Some(rt_core::dispatcher::run_tick(&processor, &shared, &mut local, &ctx));
        processor.advance_tick();
    }
    let report = last_report.unwrap();

    assert!(!report.criticality_broadcasts.is_empty(), "the overrun must raise a criticality broadcast");
    let level_after = processor.global_criticality();
    assert_eq!(level_after, CRIT_C, "escalation stops at the first level whose WCET still exceeds executed time");
    assert!(level_after >= CRIT_B, "the new level subsumes task B's own criticality");

    // Task A itself is retuned and kept alive under the new level, not discarded.
    let still_tracked = {
        let queues = shared.queues.lock();
        local.running.is_some()
            || queues.ready.iter().any(|j| j.data().task_id == TaskId(1))
            || queues.replica.iter().any(|j| j.data().task_id == TaskId(1))
    };
    assert!(still_tracked, "task A, at or above the new level, is never discarded by its own overrun");
}
