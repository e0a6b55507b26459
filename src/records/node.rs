//! Per-node bundle of hardware and process usage.

use serde::{Deserialize, Serialize};

use super::process::merge_grouped;
use super::{mean_f64, Hardware, MergeOptions, MetricRecord, ProcessRecord, Timestamped};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub timestamp_ms: f64,
    pub node_name: String,
    pub hardware: Hardware,
    #[serde(default)]
    pub processes: Vec<ProcessRecord>,
    /// Usage attributable to platform-owned processes only.
    pub platform_hardware: Hardware,
}

impl MetricRecord for NodeData {
    fn merge_with(records: &[Self], opts: &MergeOptions) -> Option<Self> {
        let first = records.first()?;

        let hardware: Vec<Hardware> = records.iter().map(|r| r.hardware.clone()).collect();
        let platform: Vec<Hardware> = records
            .iter()
            .map(|r| r.platform_hardware.clone())
            .collect();
        let processes = merge_grouped(
            records.iter().flat_map(|r| r.processes.iter().cloned()),
            opts.grouping,
        );

        Some(NodeData {
            timestamp_ms: mean_f64(records.iter().map(|r| r.timestamp_ms)),
            node_name: first.node_name.clone(),
            hardware: Hardware::merge_with(&hardware, opts)?,
            processes,
            platform_hardware: Hardware::merge_with(&platform, opts)?,
        })
    }
}

impl Timestamped for NodeData {
    fn timestamp_ms(&self) -> f64 {
        self.timestamp_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::{hardware, node, process};
    use crate::records::{ProcessGrouping, SYNTHETIC_PROCESS_ID};

    #[test]
    fn test_merge_singleton_keeps_fields() {
        let n = node("node-0", 1000.0);
        let merged = NodeData::merge(std::slice::from_ref(&n)).unwrap();
        assert_eq!(merged.timestamp_ms, n.timestamp_ms);
        assert_eq!(merged.node_name, n.node_name);
        assert_eq!(merged.hardware, n.hardware);
        assert_eq!(merged.platform_hardware, n.platform_hardware);
        assert_eq!(merged.processes.len(), 1);
        assert_eq!(merged.processes[0].process_id, SYNTHETIC_PROCESS_ID);
        assert_eq!(merged.processes[0].cpu_percent, n.processes[0].cpu_percent);
    }

    #[test]
    fn test_merge_groups_processes_across_samples() {
        let mut a = node("node-0", 1000.0);
        a.processes = vec![process(1, "svc-a", 10.0), process(2, "svc-b", 40.0)];
        let mut b = node("node-0", 2000.0);
        b.processes = vec![process(9, "svc-a", 30.0)];
        b.hardware = hardware(80.0, 70.0);

        let merged = NodeData::merge(&[a, b]).unwrap();
        assert_eq!(merged.timestamp_ms, 1500.0);
        assert_eq!(merged.hardware.cpu_percent, 60.0);
        assert_eq!(merged.processes.len(), 2);
        assert_eq!(merged.processes[0].service_identities, vec!["svc-a"]);
        assert_eq!(merged.processes[0].cpu_percent, 20.0);
        assert_eq!(merged.processes[1].cpu_percent, 40.0);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let mut a = node("node-0", 1000.0);
        a.processes = vec![process(1, "svc-a", 10.0)];
        let mut b = node("node-0", 3000.0);
        b.hardware = hardware(90.0, 10.0);
        b.platform_hardware = hardware(15.0, 4.0);
        b.processes = vec![process(7, "svc-a", 50.0)];

        let ab = NodeData::merge(&[a.clone(), b.clone()]).unwrap();
        let ba = NodeData::merge(&[b, a]).unwrap();
        assert_eq!(ab.timestamp_ms, 2000.0);
        assert_eq!(ab.timestamp_ms, ba.timestamp_ms);
        assert_eq!(ab.hardware.cpu_percent, ba.hardware.cpu_percent);
        assert_eq!(
            ab.hardware.percent_memory_in_use,
            ba.hardware.percent_memory_in_use
        );
        assert_eq!(
            ab.platform_hardware.cpu_percent,
            ba.platform_hardware.cpu_percent
        );
        assert_eq!(ab.processes.len(), 1);
        assert_eq!(ab.processes[0].cpu_percent, 30.0);
        assert_eq!(ab.processes[0].cpu_percent, ba.processes[0].cpu_percent);
        assert_eq!(ab.processes[0].counts, ba.processes[0].counts);
    }

    #[test]
    fn test_merge_with_all_identities_grouping() {
        let mut a = node("node-0", 0.0);
        let mut shared = process(3, "svc-a", 90.0);
        shared.service_identities.push("svc-b".into());
        a.processes = vec![process(1, "svc-a", 10.0), shared];

        let opts = MergeOptions {
            grouping: ProcessGrouping::AllIdentities,
        };
        let merged = NodeData::merge_with(std::slice::from_ref(&a), &opts).unwrap();
        assert_eq!(merged.processes.len(), 2);

        let merged_first = NodeData::merge(&[a]).unwrap();
        assert_eq!(merged_first.processes.len(), 1);
    }

    #[test]
    fn test_merge_tolerates_missing_process_list() {
        let mut a = node("node-0", 0.0);
        a.processes.clear();
        let b = node("node-0", 10.0);
        let merged = NodeData::merge(&[a, b]).unwrap();
        assert_eq!(merged.processes.len(), 1);
    }
}
