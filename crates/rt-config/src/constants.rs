//! Tunables from §6: DPM thresholds, migration constants, and sizing limits.

use serde::Deserialize;

/// Maximum number of criticality levels (QM, A, B, C, D).
pub const MAX_CRITICALITY_LEVELS: usize = 5;

/// DPM timing thresholds (§4.6, §6), all in ticks.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DpmThresholds {
    /// Minimum idle time before DPM entry is considered worthwhile.
    pub idle_threshold_ticks: u32,
    /// Latency to enter low-power state.
    pub entry_latency_ticks: u32,
    /// Latency to exit low-power state.
    pub exit_latency_ticks: u32,
}

impl DpmThresholds {
    /// Sum of the three thresholds, the minimum idle gap that justifies entering DPM.
    #[must_use]
    pub fn total_overhead_ticks(&self) -> u32 {
        self.idle_threshold_ticks + self.entry_latency_ticks + self.exit_latency_ticks
    }
}

impl Default for DpmThresholds {
    fn default() -> Self {
        Self { idle_threshold_ticks: 5, entry_latency_ticks: 1, exit_latency_ticks: 1 }
    }
}

/// Migration constants (§4.7, §6).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MigrationConfig {
    /// A core below this utilization is eligible to donate jobs.
    pub light_donor_util_threshold: f64,
    /// A destination core must stay below this utilization to accept a migrated job.
    pub util_upper_cap: f64,
    /// Minimum ticks between two donor offers from the same core.
    pub core_migration_cooldown_ticks: u32,
    /// Minimum ticks before a job that was migrated can be migrated again.
    pub job_migration_cooldown_ticks: u32,
    /// Extra slack margin demanded of a migration candidate, on top of `SLACK_MARGIN`.
    pub migration_penalty_ticks: u32,
    /// Maximum number of offers a donor core may issue in a single tick.
    pub max_offers_per_tick: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            light_donor_util_threshold: 0.3,
            util_upper_cap: 0.85,
            core_migration_cooldown_ticks: 10,
            job_migration_cooldown_ticks: 20,
            migration_penalty_ticks: 2,
            max_offers_per_tick: 2,
        }
    }
}

/// Top-level sizing and admission constants that are not per-task.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SystemLimits {
    /// Number of processors in the simulated fleet.
    pub num_proc: u32,
    /// Number of worker cores per processor.
    pub num_cores_per_proc: u32,
    /// Per-core job pool capacity.
    pub jobs_per_core: usize,
    /// Slack margin (ticks) demanded by `is_admissible` before any extra migration penalty.
    pub slack_margin_ticks: u32,
    /// Upper bound on the slack/demand-bound lookahead horizon, in ticks (§4.4).
    pub horizon_cap_ticks: u32,
}

impl Default for SystemLimits {
    fn default() -> Self {
        Self {
            num_proc: 1,
            num_cores_per_proc: 2,
            jobs_per_core: 64,
            slack_margin_ticks: 1,
            horizon_cap_ticks: 5000,
        }
    }
}
