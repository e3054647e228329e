//! Arrivals that outrun a deliberately undersized pool are dropped, not fatal, and the core
//! keeps completing work as slots free up (§8 scenario 6).

use rt_config::{AllocationRole, DpmThresholds, DvfsTable, MigrationConfig, SystemLimits, TaskId, CRIT_QM};
use rt_core::dispatcher::{self, AllocatedTask, CoreContext};
use rt_core::{CoreLocal, CoreState, ProcessorState};
use std::sync::Arc;

#[test]
fn pool_exhaustion_is_recoverable() {
    const POOL_CAPACITY: usize = 2;

    let allocations: Vec<AllocatedTask> = (1..=5)
        .map(|id| AllocatedTask {
            task_id: TaskId(id),
            role: AllocationRole::Primary,
            period: 3,
            relative_deadline: 50,
            task_criticality: CRIT_QM,
            wcet: [2; 5],
            tuned_deadline: [50; 5],
        })
        .collect();

    let ctx = CoreContext {
        allocations,
        limits: SystemLimits { jobs_per_core: POOL_CAPACITY, ..SystemLimits::default() },
        migration: MigrationConfig::default(),
        dpm_thresholds: DpmThresholds::default(),
        dvfs: DvfsTable::default_table(),
    };

    let processor = ProcessorState::new(0, 1, 16);
    let shared = Arc::new(CoreState::new(0, 0, POOL_CAPACITY, 4, 4));
    let mut local = CoreLocal::new(11);

    let mut completions = 0usize;
    for _ in 0..60 {
        let report = dispatcher::run_tick(&processor, &shared, &mut local, &ctx);
        assert!(report.deadline_miss.is_none(), "a 50-tick deadline is never at risk from 2-tick WCET jobs");
        assert!(
            shared.pool.len_occupied() <= POOL_CAPACITY,
            "the pool never allocates past its fixed capacity, arrivals beyond it are simply dropped"
        );
        completions += report.completion_broadcasts.len();
        processor.advance_tick();
    }

    assert!(
        completions >= 3,
        "despite five tasks contending for two slots every period, jobs still complete and free their slots"
    );
}
