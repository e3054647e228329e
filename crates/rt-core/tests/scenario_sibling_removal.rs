//! A replica whose primary completed elsewhere is dropped once the completion becomes visible
//! on this core's snapshot, with no work performed for it (§8 scenario 3).

use rt_config::{DpmThresholds, DvfsTable, MigrationConfig, SystemLimits, TaskId, CRIT_C};
use rt_core::dispatcher::{self, CoreContext};
use rt_core::{CompletionRecord, CoreLocal, CoreState, JobData, JobRef, JobState, ProcessorState};
use std::sync::Arc;

#[test]
fn replica_removed_once_primarys_completion_is_visible() {
    let ctx = CoreContext {
        allocations: vec![],
        limits: SystemLimits::default(),
        migration: MigrationConfig::default(),
        dpm_thresholds: DpmThresholds::default(),
        dvfs: DvfsTable::default_table(),
    };

    let processor = ProcessorState::new(1, 1, 16);
    let shared = Arc::new(CoreState::new(1, 0, 8, 4, 4));
    let mut local = CoreLocal::new(3);

    let mut replica_data = JobData::new(TaskId(9), CRIT_C, 5, 50, [50; 5], [5; 5], 5, true, 0, 0);
    replica_data.state = JobState::Ready;
    let idx = shared.pool.alloc(replica_data).unwrap();
    let replica_ref = JobRef::from_owned_index(Arc::clone(&shared.pool), idx, 0);
    shared.queues.lock().replica.add_to_queue_sorted(replica_ref);
    assert_eq!(shared.pool.len_occupied(), 1);

    // The timer thread on this processor harvested a completion for task 9's tick-5 arrival,
    // reported by the primary's processor one tick ago; it is visible starting this tick.
    processor.publish_completion_snapshot(vec![CompletionRecord {
        task_id: TaskId(9),
        arrival_tick: 5,
        system_tick: 6,
    }]);

    let report = dispatcher::run_tick(&processor, &shared, &mut local, &ctx);
    assert!(report.deadline_miss.is_none(), "removing a sibling replica performs no work on it");

    let queues = shared.queues.lock();
    assert!(queues.replica.is_empty(), "the replica is unlinked from its queue");
    drop(queues);
    assert_eq!(shared.pool.len_occupied(), 0, "the unlinked replica's slot is released back to the pool");
}
