//! Metric record model shared by collectors and the aggregator.
//!
//! Every record type can be reduced from a batch of same-typed samples into a
//! single representative record via [`MetricRecord::merge`]. Numeric fields are
//! averaged, identity fields are unioned or taken from the first sample.

mod cluster;
mod hardware;
mod node;
mod process;
mod snapshot;

use serde::{Deserialize, Serialize};

pub use cluster::ClusterData;
pub use hardware::{Drive, Hardware, NO_DISK_DATA};
pub use node::NodeData;
pub use process::{ProcessGrouping, ProcessRecord, SYNTHETIC_PROCESS_ID};
pub use snapshot::Snapshot;

/// Options that influence how batches are reduced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    pub grouping: ProcessGrouping,
}

/// A record that can be averaged with other records of the same type.
pub trait MetricRecord: Sized + Clone {
    /// Reduces `records` into one record using explicit merge options.
    ///
    /// Returns `None` only when `records` is empty. Inputs are never mutated.
    fn merge_with(records: &[Self], opts: &MergeOptions) -> Option<Self>;

    /// Reduces `records` into one record using the default merge options.
    fn merge(records: &[Self]) -> Option<Self> {
        Self::merge_with(records, &MergeOptions::default())
    }
}

/// Records that carry a wall-clock millisecond timestamp.
pub trait Timestamped {
    fn timestamp_ms(&self) -> f64;
}

/// Replica and instance counts for a process or the whole cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub primary: u64,
    pub replica: u64,
    pub instance: u64,
    pub total: u64,
}

impl Counts {
    pub fn new(primary: u64, replica: u64, instance: u64) -> Self {
        Self {
            primary,
            replica,
            instance,
            total: primary + replica + instance,
        }
    }

    /// Field-wise sum, used when folding per-service counts into a process or cluster.
    pub fn add(&self, other: &Counts) -> Counts {
        Counts {
            primary: self.primary + other.primary,
            replica: self.replica + other.replica,
            instance: self.instance + other.instance,
            total: self.total + other.total,
        }
    }
}

impl MetricRecord for Counts {
    fn merge_with(records: &[Self], _opts: &MergeOptions) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        Some(Counts {
            primary: mean_u64(records.iter().map(|c| c.primary)),
            replica: mean_u64(records.iter().map(|c| c.replica)),
            instance: mean_u64(records.iter().map(|c| c.instance)),
            total: mean_u64(records.iter().map(|c| c.total)),
        })
    }
}

/// Arithmetic mean of floating point samples (0.0 for no samples).
pub(crate) fn mean_f64(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Arithmetic mean of integer samples, rounded to the nearest integer.
pub(crate) fn mean_u64(values: impl Iterator<Item = u64>) -> u64 {
    let (sum, count) = values.fold((0u128, 0u128), |(s, n), v| (s + v as u128, n + 1));
    if count == 0 {
        0
    } else {
        ((sum + count / 2) / count) as u64
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn drive(name: &str, total: u64, available: u64) -> Drive {
        Drive {
            name: name.to_string(),
            total_space_gb: total,
            available_space_gb: available,
        }
    }

    pub fn hardware(cpu: f64, ram_percent: f64) -> Hardware {
        Hardware {
            cpu_percent: cpu,
            total_memory_gb: 16,
            memory_in_use_mb: 8192,
            percent_memory_in_use: ram_percent,
            drives: vec![drive("/", 100, 60)],
        }
    }

    pub fn process(pid: i64, service: &str, cpu: f64) -> ProcessRecord {
        ProcessRecord {
            process_id: pid,
            cpu_percent: cpu,
            ram_mb: 256,
            ram_percent: 1.5,
            service_identities: vec![service.to_string()],
            child_process_names: Default::default(),
            counts: Counts::new(1, 2, 0),
        }
    }

    pub fn node(name: &str, ts: f64) -> NodeData {
        NodeData {
            timestamp_ms: ts,
            node_name: name.to_string(),
            hardware: hardware(40.0, 50.0),
            processes: vec![process(100, "fabric:/App/Svc", 10.0)],
            platform_hardware: hardware(5.0, 2.0),
        }
    }

    pub fn cluster(ts: f64) -> ClusterData {
        ClusterData {
            timestamp_ms: ts,
            counts: Counts::new(4, 8, 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_helpers() {
        assert_eq!(mean_f64([1.0, 2.0, 6.0].into_iter()), 3.0);
        assert_eq!(mean_f64(std::iter::empty()), 0.0);
        assert_eq!(mean_u64([1, 2].into_iter()), 2);
        assert_eq!(mean_u64([1, 1, 2].into_iter()), 1);
        assert_eq!(mean_u64(std::iter::empty()), 0);
    }

    #[test]
    fn test_counts_merge() {
        let merged = Counts::merge(&[Counts::new(2, 4, 0), Counts::new(4, 8, 2)]).unwrap();
        assert_eq!(merged, Counts { primary: 3, replica: 6, instance: 1, total: 10 });
        assert!(Counts::merge(&[]).is_none());
    }

    #[test]
    fn test_counts_merge_is_order_independent() {
        let a = Counts::new(2, 4, 0);
        let b = Counts::new(5, 1, 3);
        let c = Counts::new(0, 7, 9);
        let abc = Counts::merge(&[a, b, c]).unwrap();
        assert_eq!(Counts::merge(&[c, a, b]).unwrap(), abc);
        assert_eq!(Counts::merge(&[b, c, a]).unwrap(), abc);
    }

    #[test]
    fn test_counts_new_computes_total() {
        let c = Counts::new(1, 2, 3);
        assert_eq!(c.total, 6);
        assert_eq!(c.add(&c).total, 12);
    }
}
