//! Two tasks on one core, run to completion with no deadline miss (§8 scenario 1).

use rt_config::{AllocationRole, CriticalityLevel, DpmThresholds, DvfsTable, MigrationConfig, SystemLimits, TaskId, CRIT_B, CRIT_C};
use rt_core::dispatcher::{self, AllocatedTask, CoreContext};
use rt_core::{CoreLocal, CoreState, ProcessorState};
use std::sync::Arc;

fn task(task_id: u32, period: u32, relative_deadline: u32, crit: CriticalityLevel, wcet: [u32; 5]) -> AllocatedTask {
    AllocatedTask {
        task_id: TaskId(task_id),
        role: AllocationRole::Primary,
        period,
        relative_deadline,
        task_criticality: crit,
        wcet,
        tuned_deadline: [relative_deadline; 5],
    }
}

#[test]
fn no_deadline_miss_under_light_load() {
    let ctx = CoreContext {
        allocations: vec![
            task(1, 10, 10, CRIT_C, [3, 3, 3, 3, 5]),
            task(2, 20, 20, CRIT_B, [2, 2, 2, 2, 2]),
        ],
        limits: SystemLimits::default(),
        migration: MigrationConfig::default(),
        dpm_thresholds: DpmThresholds::default(),
        dvfs: DvfsTable::default_table(),
    };

    let processor = ProcessorState::new(0, 1, 16);
    let shared = Arc::new(CoreState::new(0, 0, 64, 8, 8));
    let mut local = CoreLocal::new(7);

    for _ in 0..40 {
        let report = dispatcher::run_tick(&processor, &shared, &mut local, &ctx);
        assert!(report.deadline_miss.is_none(), "no task in this workload should ever miss its deadline");
        processor.advance_tick();
    }

    assert_eq!(processor.global_criticality(), 0, "neither task ever exceeds its level-0 WCET");
}
