//! Cluster-wide topology counts, produced once per collection cycle.

use serde::{Deserialize, Serialize};

use super::{mean_f64, Counts, MergeOptions, MetricRecord, Timestamped};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterData {
    pub timestamp_ms: f64,
    pub counts: Counts,
}

impl MetricRecord for ClusterData {
    fn merge_with(records: &[Self], opts: &MergeOptions) -> Option<Self> {
        let counts: Vec<Counts> = records.iter().map(|r| r.counts).collect();
        Some(ClusterData {
            timestamp_ms: mean_f64(records.iter().map(|r| r.timestamp_ms)),
            counts: Counts::merge_with(&counts, opts)?,
        })
    }
}

impl Timestamped for ClusterData {
    fn timestamp_ms(&self) -> f64 {
        self.timestamp_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::cluster;

    #[test]
    fn test_merge_averages_timestamp_and_counts() {
        let a = cluster(1000.0);
        let mut b = cluster(3000.0);
        b.counts = Counts::new(6, 10, 4);

        let merged = ClusterData::merge(&[a, b]).unwrap();
        assert_eq!(merged.timestamp_ms, 2000.0);
        assert_eq!(merged.counts, Counts { primary: 5, replica: 9, instance: 3, total: 17 });
    }

    #[test]
    fn test_merge_singleton_and_empty() {
        let c = cluster(42.0);
        assert_eq!(ClusterData::merge(std::slice::from_ref(&c)), Some(c));
        assert_eq!(ClusterData::merge(&[]), None);
    }
}
