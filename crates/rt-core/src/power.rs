//! DVFS level selection, DPM interval planning, and procrastination (§4.6).

use rt_config::{DvfsLevel, DvfsTable};

/// Chosen DVFS level plus the scaling factor a caller should apply this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DvfsDecision {
    /// Index into the table's `levels` array.
    pub level_index: usize,
    /// The level's scaling factor.
    pub scaling_factor: f64,
}

/// Select the lowest-speed DVFS level that still meets `remaining_wcet_hi` within `min_slack`
/// (§4.6). `remaining_wcet_hi` is the running job's WCET at the maximum criticality level minus
/// executed time; `min_slack` is the minimum slack across the core's current-and-higher
/// criticality levels at the current instant, computed by the caller via [`crate::slack::find_slack`].
#[must_use]
pub fn select_dvfs_level(table: &DvfsTable, remaining_wcet_hi: f64, min_slack: f64) -> DvfsDecision {
    if !min_slack.is_finite() || min_slack <= 0.0 {
        return fastest(table);
    }
    let remaining = remaining_wcet_hi;
    // search from slowest to fastest; pick the first (slowest) level whose extra runtime fits
    for (idx, level) in table.levels.iter().enumerate().rev() {
        let scaled_extra = (remaining / level.scaling_factor) - remaining;
        if scaled_extra <= min_slack {
            return DvfsDecision {
                level_index: idx,
                scaling_factor: level.scaling_factor,
            };
        }
    }
    fastest(table)
}

/// The idle clamp: lowest-speed (most power-saving) level (§4.6: "if idle, clamp to lowest").
#[must_use]
pub fn idle_dvfs_level(table: &DvfsTable) -> DvfsDecision {
    let idx = table.slowest_index();
    DvfsDecision {
        level_index: idx,
        scaling_factor: table.levels[idx].scaling_factor,
    }
}

fn fastest(table: &DvfsTable) -> DvfsDecision {
    let idx = table.fastest_index();
    DvfsDecision {
        level_index: idx,
        scaling_factor: table.levels[idx].scaling_factor,
    }
}

/// A planned low-power interval: `[now, now + duration)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpmInterval {
    /// Ticks the core will spend in low-power state.
    pub duration_ticks: u64,
    /// Whether the interval has a known end (vs. indefinite, no foreseeable arrival).
    pub indefinite: bool,
}

/// Plan a DPM interval for an idle core (§4.6 "DPM interval").
///
/// `next_arrival` is ticks-from-now until the next effective arrival, or `None` if no arrival is
/// foreseeable within the horizon the caller computed it over.
#[must_use]
pub fn plan_dpm_interval(
    next_arrival: Option<u64>,
    idle_threshold: u64,
    entry_latency: u64,
    exit_latency: u64,
) -> Option<DpmInterval> {
    let overhead = idle_threshold + entry_latency + exit_latency;
    match next_arrival {
        None => Some(DpmInterval {
            duration_ticks: 0,
            indefinite: true,
        }),
        Some(ticks) if ticks > overhead => Some(DpmInterval {
            duration_ticks: ticks,
            indefinite: false,
        }),
        Some(_) => None,
    }
}

/// Decide whether procrastination is worthwhile for a running job (§4.6 "Procrastination").
///
/// `min_slack_lowest_scale` is `find_slack` evaluated at the lowest DVFS scaling factor;
/// `next_arrival` is ticks-from-now until the next effective arrival.
#[must_use]
pub fn should_procrastinate(
    min_slack_lowest_scale: f64,
    next_arrival: Option<u64>,
    idle_threshold: u64,
    entry_latency: u64,
    exit_latency: u64,
) -> Option<DpmInterval> {
    let overhead = (idle_threshold + entry_latency + exit_latency) as f64;
    if min_slack_lowest_scale <= overhead {
        return None;
    }
    let next_arrival = next_arrival?;
    if (next_arrival as f64) <= overhead {
        return None;
    }
    let duration = min_slack_lowest_scale.min(next_arrival as f64);
    Some(DpmInterval {
        duration_ticks: duration as u64,
        indefinite: false,
    })
}

/// Verifies a DVFS table's scaling factors are monotonically decreasing with index, matching
/// `level.frequency_mhz` ordering (fastest first). Used at startup alongside
/// [`DvfsTable::validate`]; kept here rather than in `rt_config` since it is a scheduling-policy
/// invariant, not a data-shape one.
#[must_use]
pub fn levels_ordered_fastest_first(table: &DvfsTable) -> bool {
    table
        .levels
        .windows(2)
        .all(|w: &[DvfsLevel]| w[0].scaling_factor > w[1].scaling_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_config::DvfsTable;

    #[test]
    fn no_slack_clamps_to_full_speed() {
        let table = DvfsTable::default_table();
        let decision = select_dvfs_level(&table, 10.0, 0.0);
        assert_eq!(decision.level_index, table.fastest_index());
    }

    #[test]
    fn ample_slack_allows_slowest_level() {
        let table = DvfsTable::default_table();
        let decision = select_dvfs_level(&table, 1.0, 1000.0);
        assert_eq!(decision.level_index, table.slowest_index());
    }

    #[test]
    fn dpm_not_entered_below_overhead() {
        assert_eq!(plan_dpm_interval(Some(5), 5, 1, 1), None);
        assert!(plan_dpm_interval(Some(10), 5, 1, 1).is_some());
    }

    #[test]
    fn procrastination_requires_slack_and_arrival_margin() {
        assert_eq!(should_procrastinate(3.0, Some(20), 5, 1, 1), None);
        let interval = should_procrastinate(50.0, Some(20), 5, 1, 1).unwrap();
        assert_eq!(interval.duration_ticks, 20);
    }
}
