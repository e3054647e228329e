//! Demand-bound slack and admission (§4.4).

use crate::job::JobDemandView;
use rt_config::{CriticalityLevel, MAX_CRITICALITY_LEVELS};

/// The subset of an allocation entry's and its task's fields that demand computation needs for
/// tasks statically bound to a core — not just the jobs currently queued on it.
#[derive(Debug, Clone, Copy)]
pub struct CoreAllocation {
    /// The task's period, in ticks.
    pub period: u32,
    /// The task's own declared criticality level.
    pub task_criticality: CriticalityLevel,
    /// WCET at each criticality level.
    pub wcet: [u32; MAX_CRITICALITY_LEVELS],
    /// Tuned relative deadline at each criticality level.
    pub tuned_deadline: [u32; MAX_CRITICALITY_LEVELS],
}

/// Greatest common divisor, for LCM computation.
fn gcd(a: u64, b: u64) -> u64 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// LCM of `periods`, capped at `cap` (§4.4: "horizon ... capped at 5000 ticks").
fn bounded_lcm(periods: impl Iterator<Item = u32>, cap: u64) -> u64 {
    let mut acc: u64 = 1;
    for p in periods {
        let p = u64::from(p.max(1));
        let g = gcd(acc, p);
        let candidate = (acc / g).saturating_mul(p);
        acc = candidate.min(cap);
        if acc >= cap {
            return cap;
        }
    }
    acc.min(cap)
}

fn remaining_wcet_at(job: &JobDemandView, level: CriticalityLevel) -> f64 {
    (f64::from(job.wcet[level as usize]) - job.executed_time).max(0.0)
}

/// Demand placed on the core by already-materialized jobs, at deadline point `d` (§4.4).
fn job_demand(
    jobs: &[JobDemandView],
    extra: Option<&JobDemandView>,
    level: CriticalityLevel,
    d: u64,
    scale: f64,
) -> f64 {
    let mut total = 0.0;
    for job in jobs.iter().chain(extra) {
        let d_j = job.arrival_tick + u64::from(job.tuned_deadline[level as usize]);
        if d_j <= d {
            total += (remaining_wcet_at(job, level) / scale).max(0.0);
        }
    }
    total
}

/// Demand placed on the core by future (not-yet-materialized) arrivals of its statically
/// allocated tasks, at deadline point `d` (§4.4 second bullet).
fn future_arrival_demand(
    allocations: &[CoreAllocation],
    level: CriticalityLevel,
    t_start: u64,
    d: u64,
    scale: f64,
) -> f64 {
    let mut total = 0.0;
    for alloc in allocations {
        if alloc.task_criticality < level {
            continue;
        }
        let period = u64::from(alloc.period.max(1));
        let tuned = u64::from(alloc.tuned_deadline[level as usize]);
        let mut a = (t_start + 1).div_ceil(period) * period;
        while a + tuned <= d {
            total += f64::from(alloc.wcet[level as usize]) / scale;
            a += period;
        }
    }
    total
}

/// Every future-arrival deadline point within the horizon, for tasks at or above `level`.
fn future_arrival_deadline_points(
    allocations: &[CoreAllocation],
    level: CriticalityLevel,
    t_start: u64,
    horizon_cap: u64,
) -> Vec<u64> {
    let horizon = bounded_lcm(
        allocations
            .iter()
            .filter(|a| a.task_criticality >= level)
            .map(|a| a.period),
        horizon_cap,
    );
    let horizon_end = t_start + horizon;
    let mut points = Vec::new();
    for alloc in allocations {
        if alloc.task_criticality < level {
            continue;
        }
        let period = u64::from(alloc.period.max(1));
        let tuned = u64::from(alloc.tuned_deadline[level as usize]);
        let mut a = (t_start + 1).div_ceil(period) * period;
        while a <= horizon_end {
            points.push(a + tuned);
            a += period;
        }
    }
    points
}

/// `find_slack(c, L, t_start, s, e)` (§4.4): the minimum, over all relevant deadline points,
/// of `(d - t_start) - demand(d)`, floored at zero; `+inf` if no deadline points exist.
///
/// `jobs` is a snapshot of every job in running, ready, replica, and pending on this core,
/// cloned out from under their queue locks (see [`JobDemandView`]'s doc comment for why).
#[must_use]
pub fn find_slack(
    jobs: &[JobDemandView],
    allocations: &[CoreAllocation],
    level: CriticalityLevel,
    t_start: u64,
    scale: f64,
    extra: Option<&JobDemandView>,
    horizon_cap: u64,
) -> f64 {
    let mut points: Vec<u64> = jobs
        .iter()
        .chain(extra)
        .map(|j| j.arrival_tick + u64::from(j.tuned_deadline[level as usize]))
        .filter(|d| *d > t_start)
        .collect();
    points.extend(future_arrival_deadline_points(allocations, level, t_start, horizon_cap));

    if points.is_empty() {
        return f64::INFINITY;
    }

    points
        .into_iter()
        .map(|d| {
            let demand = job_demand(jobs, extra, level, d, scale)
                + future_arrival_demand(allocations, level, t_start, d, scale);
            ((d - t_start) as f64 - demand).max(0.0)
        })
        .fold(f64::INFINITY, f64::min)
}

/// `is_admissible(c, candidate, extra_margin)` (§4.4): true iff at every criticality level from
/// `current_level` up to `MAX_CRITICALITY_LEVELS - 1`, the candidate's virtual deadline at that
/// level is in the future and the core has enough slack to absorb it.
#[must_use]
pub fn is_admissible(
    jobs: &[JobDemandView],
    allocations: &[CoreAllocation],
    current_level: CriticalityLevel,
    candidate: &JobDemandView,
    slack_margin: f64,
    extra_margin: f64,
    horizon_cap: u64,
) -> bool {
    for level in current_level..MAX_CRITICALITY_LEVELS as CriticalityLevel {
        let virtual_deadline = candidate.arrival_tick + u64::from(candidate.tuned_deadline[level as usize]);
        if virtual_deadline <= candidate.arrival_tick {
            return false;
        }
        let slack = find_slack(jobs, allocations, level, candidate.arrival_tick, 1.0, Some(candidate), horizon_cap);
        if slack < slack_margin + extra_margin {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(arrival: u64, tuned: u32, wcet: u32, executed: f64) -> JobDemandView {
        JobDemandView {
            arrival_tick: arrival,
            tuned_deadline: [tuned; MAX_CRITICALITY_LEVELS],
            wcet: [wcet; MAX_CRITICALITY_LEVELS],
            executed_time: executed,
        }
    }

    #[test]
    fn no_deadlines_means_infinite_slack() {
        let jobs: Vec<JobDemandView> = Vec::new();
        let allocations: Vec<CoreAllocation> = Vec::new();
        let slack = find_slack(&jobs, &allocations, 1, 0, 1.0, None, 5000);
        assert_eq!(slack, f64::INFINITY);
    }

    #[test]
    fn single_job_slack_matches_manual_computation() {
        let jobs = vec![job(0, 10, 3, 0.0)];
        let allocations: Vec<CoreAllocation> = Vec::new();
        // one deadline point at d=10; demand=3; slack = (10-0)-3 = 7
        let slack = find_slack(&jobs, &allocations, 1, 0, 1.0, None, 5000);
        assert!((slack - 7.0).abs() < 1e-9);
    }

    #[test]
    fn far_future_t_start_yields_infinite_slack_past_horizon() {
        let allocations = vec![CoreAllocation {
            period: 10,
            task_criticality: 2,
            wcet: [2; MAX_CRITICALITY_LEVELS],
            tuned_deadline: [10; MAX_CRITICALITY_LEVELS],
        }];
        let jobs: Vec<JobDemandView> = Vec::new();
        // t_start far beyond any job's deadline and beyond a capped horizon with no queued jobs
        let slack = find_slack(&jobs, &allocations, 1, 100_000, 1.0, None, 5000);
        assert_eq!(slack, f64::INFINITY);
    }
}
