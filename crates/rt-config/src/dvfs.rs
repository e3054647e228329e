//! DVFS operating-point table (§4.6, §6).

use serde::Deserialize;

/// Number of DVFS operating points, from full speed down to the lowest.
pub const NUM_DVFS_LEVELS: usize = 6;

/// A single DVFS operating point.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DvfsLevel {
    /// Operating frequency, in MHz. Informational only; scheduling uses `scaling_factor`.
    pub frequency_mhz: u32,
    /// Operating voltage, in mV. Informational only.
    pub voltage_mv: u32,
    /// Execution-time scaling factor at this level (1.0 = full speed).
    pub scaling_factor: f64,
}

/// The six-entry DVFS table, strictly decreasing in `scaling_factor` from index 0.
#[derive(Debug, Clone, Deserialize)]
pub struct DvfsTable {
    /// Levels in descending-speed order; `levels[0]` is full speed (scale 1.0).
    pub levels: [DvfsLevel; NUM_DVFS_LEVELS],
}

impl DvfsTable {
    /// The default six-level table: 1.0, 0.88, 0.76, 0.64, 0.52, 0.4.
    #[must_use]
    pub fn default_table() -> Self {
        Self {
            levels: [
                DvfsLevel { frequency_mhz: 2000, voltage_mv: 1150, scaling_factor: 1.0 },
                DvfsLevel { frequency_mhz: 1760, voltage_mv: 1070, scaling_factor: 0.88 },
                DvfsLevel { frequency_mhz: 1520, voltage_mv: 990, scaling_factor: 0.76 },
                DvfsLevel { frequency_mhz: 1280, voltage_mv: 910, scaling_factor: 0.64 },
                DvfsLevel { frequency_mhz: 1040, voltage_mv: 830, scaling_factor: 0.52 },
                DvfsLevel { frequency_mhz: 800, voltage_mv: 750, scaling_factor: 0.4 },
            ],
        }
    }

    /// Index of the highest-speed (fastest) level.
    #[must_use]
    pub fn fastest_index(&self) -> usize {
        0
    }

    /// Index of the lowest-speed (slowest) level.
    #[must_use]
    pub fn slowest_index(&self) -> usize {
        self.levels.len() - 1
    }

    /// Validate that scaling factors strictly decrease from index 0.
    pub fn validate(&self) -> Result<(), String> {
        for pair in self.levels.windows(2) {
            if pair[1].scaling_factor >= pair[0].scaling_factor {
                return Err(format!(
                    "DVFS scaling factors must be strictly decreasing, found {} then {}",
                    pair[0].scaling_factor, pair[1].scaling_factor
                ));
            }
            if pair[0].scaling_factor <= 0.0 || pair[1].scaling_factor <= 0.0 {
                return Err("DVFS scaling factors must be positive".to_string());
            }
        }
        Ok(())
    }
}

impl Default for DvfsTable {
    fn default() -> Self {
        Self::default_table()
    }
}
