//! Time-aligned view of the cluster: topology counts plus every reporting node.

use serde::{Deserialize, Serialize};

use super::{
    mean_f64, ClusterData, MergeOptions, MetricRecord, NodeData, Timestamped, NO_DISK_DATA,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    timestamp_ms: f64,
    cluster: ClusterData,
    nodes: Vec<NodeData>,
}

impl Snapshot {
    pub fn new(timestamp_ms: f64, cluster: ClusterData, nodes: Vec<NodeData>) -> Self {
        Self {
            timestamp_ms,
            cluster,
            nodes,
        }
    }

    pub fn cluster(&self) -> &ClusterData {
        &self.cluster
    }

    pub fn nodes(&self) -> &[NodeData] {
        &self.nodes
    }

    /// Mean CPU usage across reporting nodes.
    pub fn average_cpu_percent(&self) -> f64 {
        mean_f64(self.nodes.iter().map(|n| n.hardware.cpu_percent))
    }

    /// Mean memory usage across reporting nodes.
    pub fn average_ram_percent(&self) -> f64 {
        mean_f64(self.nodes.iter().map(|n| n.hardware.percent_memory_in_use))
    }

    /// Mean disk usage across nodes that reported drives, or [`NO_DISK_DATA`].
    pub fn average_disk_percent(&self) -> f64 {
        let values: Vec<f64> = self
            .nodes
            .iter()
            .map(|n| n.hardware.disk_percent_in_use())
            .filter(|v| *v >= 0.0)
            .collect();
        if values.is_empty() {
            NO_DISK_DATA
        } else {
            mean_f64(values.into_iter())
        }
    }

    /// Estimated number of replicas the cluster could hold at full utilisation
    /// of its most constrained resource.
    ///
    /// `None` when no resource shows positive usage.
    pub fn capacity_estimate(&self) -> Option<u64> {
        let bottleneck = self
            .average_cpu_percent()
            .max(self.average_ram_percent())
            .max(self.average_disk_percent());
        if bottleneck <= 0.0 {
            return None;
        }
        Some((100.0 * self.cluster.counts.total as f64 / bottleneck).floor() as u64)
    }
}

impl MetricRecord for Snapshot {
    /// Collapses snapshots into one: node data is grouped per node name,
    /// cluster data and timestamps are averaged.
    fn merge_with(records: &[Self], opts: &MergeOptions) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let mut per_node: Vec<(&str, Vec<NodeData>)> = Vec::new();
        for node in records.iter().flat_map(|s| s.nodes.iter()) {
            match per_node.iter_mut().find(|(name, _)| *name == node.node_name) {
                Some((_, samples)) => samples.push(node.clone()),
                None => per_node.push((node.node_name.as_str(), vec![node.clone()])),
            }
        }
        let nodes = per_node
            .into_iter()
            .filter_map(|(_, samples)| NodeData::merge_with(&samples, opts))
            .collect();

        let clusters: Vec<ClusterData> = records.iter().map(|s| s.cluster.clone()).collect();

        Some(Snapshot {
            timestamp_ms: mean_f64(records.iter().map(|s| s.timestamp_ms)),
            cluster: ClusterData::merge_with(&clusters, opts)?,
            nodes,
        })
    }
}

impl Timestamped for Snapshot {
    fn timestamp_ms(&self) -> f64 {
        self.timestamp_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::{cluster, drive, hardware, node};
    use crate::records::Counts;

    fn snapshot(ts: f64) -> Snapshot {
        Snapshot::new(ts, cluster(ts), vec![node("node-0", ts), node("node-1", ts)])
    }

    #[test]
    fn test_derived_averages() {
        let mut s = snapshot(0.0);
        s.nodes[1].hardware = hardware(60.0, 70.0);
        s.nodes[1].hardware.drives = vec![drive("/", 100, 20)];

        assert_eq!(s.average_cpu_percent(), 50.0);
        assert_eq!(s.average_ram_percent(), 60.0);
        assert!((s.average_disk_percent() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_disk_average_skips_nodes_without_drives() {
        let mut s = snapshot(0.0);
        s.nodes[0].hardware.drives.clear();
        assert!((s.average_disk_percent() - 40.0).abs() < 1e-9);

        s.nodes[1].hardware.drives.clear();
        assert_eq!(s.average_disk_percent(), NO_DISK_DATA);
    }

    #[test]
    fn test_capacity_estimate() {
        let mut s = snapshot(0.0);
        s.cluster.counts = Counts::new(10, 30, 0);
        // cpu 40, ram 50, disk 40 => bottleneck 50
        assert_eq!(s.capacity_estimate(), Some(80));

        for n in &mut s.nodes {
            n.hardware = hardware(0.0, 0.0);
            n.hardware.drives.clear();
        }
        assert_eq!(s.capacity_estimate(), None);
    }

    #[test]
    fn test_merge_groups_nodes_by_name() {
        let a = snapshot(100.0);
        let mut b = snapshot(300.0);
        b.nodes.truncate(1);
        b.nodes[0].hardware = hardware(80.0, 50.0);

        let merged = Snapshot::merge(&[a, b]).unwrap();
        assert_eq!(merged.timestamp_ms(), 200.0);
        assert_eq!(merged.nodes().len(), 2);
        assert_eq!(merged.nodes()[0].node_name, "node-0");
        assert_eq!(merged.nodes()[0].hardware.cpu_percent, 60.0);
        assert_eq!(merged.nodes()[1].hardware.cpu_percent, 40.0);
        assert_eq!(merged.cluster().timestamp_ms, 200.0);
    }
}
