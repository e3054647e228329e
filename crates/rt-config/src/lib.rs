//! Static, read-only configuration for the mixed-criticality scheduler: task and allocation
//! tables, DVFS table, and the DPM/migration/sizing tunables of §6.
//!
//! Configuration is layered (§10.3): compiled-in defaults, optionally overridden by a YAML
//! file. Everything here is consumed read-only once the scheduler starts; there is no mutation
//! of [`SchedulerConfig`] after [`SchedulerConfig::load`] returns.

#![deny(unsafe_code)]

pub mod allocation;
pub mod constants;
pub mod dvfs;
pub mod error;
pub mod task;

pub use allocation::{AllocationEntry, AllocationRole};
pub use constants::{DpmThresholds, MigrationConfig, SystemLimits, MAX_CRITICALITY_LEVELS};
pub use dvfs::{DvfsLevel, DvfsTable, NUM_DVFS_LEVELS};
pub use task::{CriticalityLevel, Task, TaskId, CRIT_A, CRIT_B, CRIT_C, CRIT_D, CRIT_QM};

use error::Error;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// The full, validated static configuration consumed by the rest of the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sizing and admission limits.
    pub limits: SystemLimits,
    /// DVFS operating-point table.
    pub dvfs: DvfsTable,
    /// DPM timing thresholds.
    pub dpm: DpmThresholds,
    /// Migration tunables.
    pub migration: MigrationConfig,
    /// The static task table.
    pub tasks: Vec<Task>,
    /// The static allocation table.
    pub allocations: Vec<AllocationEntry>,
    task_index: HashMap<TaskId, usize>,
}

/// On-disk (YAML) shape of a [`SchedulerConfig`]; every field is optional so a file can
/// override only what it needs to, the rest falling back to compiled defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    limits: Option<SystemLimits>,
    dvfs: Option<DvfsTable>,
    dpm: Option<DpmThresholds>,
    migration: Option<MigrationConfig>,
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    allocations: Vec<AllocationEntry>,
}

impl SchedulerConfig {
    /// Load configuration from compiled-in defaults, optionally overridden by a YAML file at
    /// `path`. Pass `None` to use the built-in scenario-1 task set (§8).
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let raw = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| Error::FileReadError {
                    path: path.display().to_string(),
                    source,
                })?;
                serde_yaml::from_str::<RawConfig>(&text).map_err(|source| {
                    Error::DeserializationError { path: path.display().to_string(), source }
                })?
            }
            None => RawConfig::default(),
        };

        let tasks = if raw.tasks.is_empty() { default_task_set() } else { raw.tasks };
        let allocations =
            if raw.allocations.is_empty() { default_allocation_set() } else { raw.allocations };

        let config = Self {
            limits: raw.limits.unwrap_or_default(),
            dvfs: raw.dvfs.unwrap_or_default(),
            dpm: raw.dpm.unwrap_or_default(),
            migration: raw.migration.unwrap_or_default(),
            task_index: tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect(),
            tasks,
            allocations,
        };
        config.validate()?;
        Ok(config)
    }

    /// `find_task_by_id` (§4.8): O(1) lookup of a task by id.
    #[must_use]
    pub fn find_task_by_id(&self, id: TaskId) -> Option<&Task> {
        self.task_index.get(&id).map(|&i| &self.tasks[i])
    }

    /// All allocation entries placed on the given (processor, core).
    pub fn allocations_for_core(
        &self,
        processor_id: u32,
        core_id: u32,
    ) -> impl Iterator<Item = &AllocationEntry> {
        self.allocations
            .iter()
            .filter(move |a| a.processor_id == processor_id && a.core_id == core_id)
    }

    fn validate(&self) -> Result<(), Error> {
        let mut issues = Vec::new();

        let mut seen = HashMap::new();
        for task in &self.tasks {
            if seen.insert(task.id, ()).is_some() {
                issues.push(format!("duplicate task id {}", task.id));
            }
            if task.criticality as usize >= MAX_CRITICALITY_LEVELS {
                issues.push(format!(
                    "task {} has out-of-range criticality {}",
                    task.id, task.criticality
                ));
            }
            if task.period == 0 {
                issues.push(format!("task {} has zero period", task.id));
            }
        }

        for alloc in &self.allocations {
            if self.find_task_by_id(alloc.task_id).is_none() {
                issues.push(format!(
                    "allocation references unknown task id {}",
                    alloc.task_id
                ));
            }
        }

        for task in &self.tasks {
            let replicas = self
                .allocations
                .iter()
                .filter(|a| a.task_id == task.id && a.role == AllocationRole::Replica)
                .count();
            if replicas as u32 != task.replica_count {
                issues.push(format!(
                    "task {} declares {} replicas but has {} replica allocation(s)",
                    task.id, task.replica_count, replicas
                ));
            }
            let primaries = self
                .allocations
                .iter()
                .filter(|a| a.task_id == task.id && a.role == AllocationRole::Primary)
                .count();
            if primaries != 1 {
                issues.push(format!(
                    "task {} must have exactly one primary allocation, found {}",
                    task.id, primaries
                ));
            }
        }

        if let Err(e) = self.dvfs.validate() {
            issues.push(e);
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration { issues })
        }
    }
}

/// The scenario-1 (§8) default task set: used when no config file is supplied.
fn default_task_set() -> Vec<Task> {
    vec![
        Task {
            id: TaskId(1),
            period: 10,
            relative_deadline: 10,
            wcet: [3, 3, 3, 3, 5],
            criticality: CRIT_C,
            replica_count: 0,
        },
        Task {
            id: TaskId(2),
            period: 20,
            relative_deadline: 20,
            wcet: [2, 2, 2, 2, 2],
            criticality: CRIT_B,
            replica_count: 0,
        },
    ]
}

fn default_allocation_set() -> Vec<AllocationEntry> {
    vec![
        AllocationEntry {
            task_id: TaskId(1),
            role: AllocationRole::Primary,
            processor_id: 0,
            core_id: 0,
            tuned_deadline: [10, 9, 8, 7, 10],
        },
        AllocationEntry {
            task_id: TaskId(2),
            role: AllocationRole::Primary,
            processor_id: 0,
            core_id: 0,
            tuned_deadline: [20, 18, 16, 14, 20],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_loads_and_validates() {
        let cfg = SchedulerConfig::load(None).expect("default config must validate");
        assert_eq!(cfg.tasks.len(), 2);
        assert!(cfg.find_task_by_id(TaskId(1)).is_some());
        assert!(cfg.find_task_by_id(TaskId(999)).is_none());
    }

    #[test]
    fn rejects_duplicate_task_ids() {
        let yaml = r#"
tasks:
  - id: 1
    period: 10
    relative_deadline: 10
    wcet: [1,1,1,1,1]
    criticality: 0
    replica_count: 0
  - id: 1
    period: 10
    relative_deadline: 10
    wcet: [1,1,1,1,1]
    criticality: 0
    replica_count: 0
allocations:
  - task_id: 1
    role: primary
    processor_id: 0
    core_id: 0
    tuned_deadline: [10,10,10,10,10]
"#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cfg.yaml");
        std::fs::write(&path, yaml).expect("write config");
        let err = SchedulerConfig::load(Some(&path)).expect_err("duplicate ids must be rejected");
        match err {
            Error::InvalidConfiguration { issues } => {
                assert!(issues.iter().any(|i| i.contains("duplicate task id")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_allocation_to_unknown_task() {
        let yaml = r#"
tasks:
  - id: 1
    period: 10
    relative_deadline: 10
    wcet: [1,1,1,1,1]
    criticality: 0
    replica_count: 0
allocations:
  - task_id: 99
    role: primary
    processor_id: 0
    core_id: 0
    tuned_deadline: [10,10,10,10,10]
"#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cfg.yaml");
        std::fs::write(&path, yaml).expect("write config");
        let err = SchedulerConfig::load(Some(&path)).expect_err("unknown task ref must be rejected");
        match err {
            Error::InvalidConfiguration { issues } => {
                assert!(issues.iter().any(|i| i.contains("unknown task id")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
