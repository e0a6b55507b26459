//! Hardware usage of a node or of a set of processes.

use serde::{Deserialize, Serialize};

use super::{mean_f64, mean_u64, MergeOptions, MetricRecord};

/// Returned by [`Hardware::disk_percent_in_use`] when no drive was reported.
pub const NO_DISK_DATA: f64 = -1.0;

/// Capacity of a single mounted drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drive {
    pub name: String,
    pub total_space_gb: u64,
    pub available_space_gb: u64,
}

/// CPU, memory and disk usage sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hardware {
    pub cpu_percent: f64,
    pub total_memory_gb: u64,
    pub memory_in_use_mb: u64,
    pub percent_memory_in_use: f64,
    #[serde(default)]
    pub drives: Vec<Drive>,
}

impl Hardware {
    /// Percentage of disk space in use across all drives, or [`NO_DISK_DATA`].
    pub fn disk_percent_in_use(&self) -> f64 {
        let total: u64 = self.drives.iter().map(|d| d.total_space_gb).sum();
        if self.drives.is_empty() || total == 0 {
            return NO_DISK_DATA;
        }
        let available: u64 = self.drives.iter().map(|d| d.available_space_gb).sum();
        let used = total.saturating_sub(available);
        used as f64 / total as f64 * 100.0
    }
}

impl MetricRecord for Hardware {
    fn merge_with(records: &[Self], _opts: &MergeOptions) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        // Drives are matched by name, keeping the order in which they were first seen.
        let mut names: Vec<&str> = Vec::new();
        for drive in records.iter().flat_map(|r| r.drives.iter()) {
            if !names.contains(&drive.name.as_str()) {
                names.push(drive.name.as_str());
            }
        }
        let drives = names
            .into_iter()
            .map(|name| {
                let samples: Vec<&Drive> = records
                    .iter()
                    .flat_map(|r| r.drives.iter())
                    .filter(|d| d.name == name)
                    .collect();
                Drive {
                    name: name.to_string(),
                    total_space_gb: mean_u64(samples.iter().map(|d| d.total_space_gb)),
                    available_space_gb: mean_u64(samples.iter().map(|d| d.available_space_gb)),
                }
            })
            .collect();

        Some(Hardware {
            cpu_percent: mean_f64(records.iter().map(|r| r.cpu_percent)),
            total_memory_gb: mean_u64(records.iter().map(|r| r.total_memory_gb)),
            memory_in_use_mb: mean_u64(records.iter().map(|r| r.memory_in_use_mb)),
            percent_memory_in_use: mean_f64(records.iter().map(|r| r.percent_memory_in_use)),
            drives,
        })
    }
}
