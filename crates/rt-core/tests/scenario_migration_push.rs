//! A donor core offers a ready job to a sibling; the sibling either admits it or rejects it, and
//! in both cases the job itself survives (§8 scenario 4).

use rt_config::{MigrationConfig, TaskId, CRIT_B};
use rt_core::migration::{self, ReceiveOutcome};
use rt_core::{CoreState, JobData, JobState};
use std::sync::Arc;

fn queue_ready_job(core: &Arc<CoreState>, task: u32, arrival: u64) {
    let mut data = JobData::new(TaskId(task), CRIT_B, arrival, 50, [50; 5], [3; 5], 3, false, core.core_id, 0);
    data.state = JobState::Ready;
    let idx = core.pool.alloc(data).unwrap();
    let job = rt_core::JobRef::from_owned_index(Arc::clone(&core.pool), idx, core.core_id);
    core.queues.lock().ready.add_to_queue_sorted(job);
}

#[test]
fn donor_offer_is_admitted_by_an_idle_sibling() {
    let config = MigrationConfig::default();
    let donor = Arc::new(CoreState::new(0, 0, 8, 4, 4));
    let destination = Arc::new(CoreState::new(0, 1, 8, 4, 4));

    assert!(
        migration::is_eligible_donor(0.2, 0, 10, &config),
        "a lightly-loaded core past its cooldown may donate"
    );
    assert!(
        migration::is_eligible_destination(0.1, &config),
        "an idle sibling is below the acceptance cap"
    );

    queue_ready_job(&donor, 42, 10);

    assert!(migration::offer_one(&donor, &destination), "the destination's inbox has room");
    assert_eq!(donor.pool.len_occupied(), 1, "the offer clones the job; the original stays on the donor");
    assert_eq!(donor.queues.lock().ready.len(), 1, "the original is still linked in the donor's own queue");

    let outcome = migration::receive_migration_offer(&destination, &[], &[], 0, 1.0, 2.0, 5000);
    match outcome {
        ReceiveOutcome::Accepted { job, from_core } => {
            assert_eq!(from_core, 0);
            migration::finish_acceptance(&donor, &destination, job, 10, 20);
        }
        ReceiveOutcome::Rejected { .. } | ReceiveOutcome::Empty | ReceiveOutcome::Contended => {
            panic!("an idle destination with ample slack must accept this offer");
        }
    }

    assert_eq!(destination.queues.lock().ready.len(), 1, "the migrated copy now lives on the destination");
    assert_eq!(donor.queues.lock().ready.len(), 0, "the original is detached from the donor once accepted");
    assert_eq!(donor.pool.len_occupied(), 0, "the donor's slot for the original is freed on acceptance");

    // A second donor offer from the same core before its cooldown elapses must be refused.
    assert!(
        !migration::is_eligible_donor(0.2, 15, 10, &config),
        "the donor cooldown blocks a second push within the window"
    );
}

#[test]
fn rejected_offer_leaves_the_original_job_intact_on_the_donor() {
    let donor = Arc::new(CoreState::new(0, 0, 8, 4, 4));
    let destination = Arc::new(CoreState::new(0, 1, 8, 4, 4));

    queue_ready_job(&donor, 7, 0);

    assert!(migration::offer_one(&donor, &destination), "the destination's inbox has room");
    assert_eq!(donor.pool.len_occupied(), 1, "offering clones the job; the original is untouched so far");
    {
        let queues = donor.queues.lock();
        assert_eq!(queues.ready.len(), 1, "the original stays linked in the donor's queue while the offer is in flight");
        assert!(queues.ready.peek().unwrap().data().is_being_offered(), "the original is marked offered for the duration");
    }

    // A slack margin this large can never be met, forcing rejection regardless of the job.
    let outcome = migration::receive_migration_offer(&destination, &[], &[], 0, 1_000_000.0, 0.0, 5000);
    match outcome {
        ReceiveOutcome::Rejected { task_id, arrival_tick, from_core } => {
            assert_eq!(task_id, TaskId(7));
            assert_eq!(arrival_tick, 0);
            assert_eq!(from_core, 0);
            migration::finish_rejection(&donor, task_id, arrival_tick);
        }
        ReceiveOutcome::Accepted { .. } | ReceiveOutcome::Empty | ReceiveOutcome::Contended => {
            panic!("an impossibly large slack margin must force rejection");
        }
    }

    assert_eq!(donor.pool.len_occupied(), 1, "a rejected offer never costs the donor its job");
    let queues = donor.queues.lock();
    assert_eq!(queues.ready.len(), 1, "the original is still queued on the donor after rejection");
    assert!(
        !queues.ready.peek().unwrap().data().is_being_offered(),
        "rejection clears the offered flag so the job is eligible again"
    );
    assert_eq!(destination.pool.len_occupied(), 0, "the destination never materializes a copy for a rejected offer");
}
