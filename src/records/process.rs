//! Per-process resource usage attributed to the services hosted in it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{mean_f64, mean_u64, Counts, MergeOptions, MetricRecord};

/// Process id carried by merged records, which no longer describe one OS process.
pub const SYNTHETIC_PROCESS_ID: i64 = -1;

/// Usage sample for one OS process hosting one or more services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub process_id: i64,
    pub cpu_percent: f64,
    pub ram_mb: u64,
    pub ram_percent: f64,
    /// Services sharing this process, in the order they were reported.
    #[serde(default)]
    pub service_identities: Vec<String>,
    #[serde(default)]
    pub child_process_names: BTreeSet<String>,
    #[serde(default)]
    pub counts: Counts,
}

/// How process samples are matched across a batch before averaging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessGrouping {
    /// Key on the first service identity. Processes shared by several
    /// services collapse onto whichever service was reported first.
    #[default]
    FirstIdentity,
    /// Key on the full, sorted set of service identities.
    AllIdentities,
}

impl ProcessGrouping {
    /// Grouping key of `record` under this strategy.
    ///
    /// Records without any service identity fall back to their process id.
    pub fn key(&self, record: &ProcessRecord) -> String {
        if record.service_identities.is_empty() {
            return format!("pid:{}", record.process_id);
        }
        match self {
            ProcessGrouping::FirstIdentity => record.service_identities[0].clone(),
            ProcessGrouping::AllIdentities => {
                let mut ids: Vec<&str> =
                    record.service_identities.iter().map(String::as_str).collect();
                ids.sort_unstable();
                ids.dedup();
                ids.join("|")
            }
        }
    }
}

impl fmt::Display for ProcessGrouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessGrouping::FirstIdentity => write!(f, "first_identity"),
            ProcessGrouping::AllIdentities => write!(f, "all_identities"),
        }
    }
}

impl FromStr for ProcessGrouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_identity" => Ok(ProcessGrouping::FirstIdentity),
            "all_identities" => Ok(ProcessGrouping::AllIdentities),
            other => Err(format!(
                "Invalid process_grouping '{}', expected 'first_identity' or 'all_identities'",
                other
            )),
        }
    }
}

impl MetricRecord for ProcessRecord {
    fn merge_with(records: &[Self], _opts: &MergeOptions) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let mut service_identities: Vec<String> = Vec::new();
        for id in records.iter().flat_map(|r| r.service_identities.iter()) {
            if !service_identities.contains(id) {
                service_identities.push(id.clone());
            }
        }

        let child_process_names = records
            .iter()
            .flat_map(|r| r.child_process_names.iter().cloned())
            .collect();

        let counts: Vec<Counts> = records.iter().map(|r| r.counts).collect();

        Some(ProcessRecord {
            process_id: SYNTHETIC_PROCESS_ID,
            cpu_percent: mean_f64(records.iter().map(|r| r.cpu_percent)),
            ram_mb: mean_u64(records.iter().map(|r| r.ram_mb)),
            ram_percent: mean_f64(records.iter().map(|r| r.ram_percent)),
            service_identities,
            child_process_names,
            counts: Counts::merge(&counts).unwrap_or_default(),
        })
    }
}

/// Groups process samples by `grouping` and merges each group.
///
/// Groups keep the order in which their key was first seen.
pub(crate) fn merge_grouped(
    records: impl IntoIterator<Item = ProcessRecord>,
    grouping: ProcessGrouping,
) -> Vec<ProcessRecord> {
    let mut groups: Vec<(String, Vec<ProcessRecord>)> = Vec::new();
    for record in records {
        let key = grouping.key(&record);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(record),
            None => groups.push((key, vec![record])),
        }
    }

    let opts = MergeOptions { grouping };
    groups
        .into_iter()
        .filter_map(|(_, members)| ProcessRecord::merge_with(&members, &opts))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::process;

    #[test]
    fn test_merge_singleton_resets_process_id() {
        let p = process(4242, "fabric:/App/Svc", 12.5);
        let merged = ProcessRecord::merge(std::slice::from_ref(&p)).unwrap();
        assert_eq!(merged.process_id, SYNTHETIC_PROCESS_ID);

        let mut expected = p;
        expected.process_id = SYNTHETIC_PROCESS_ID;
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_merge_unions_identities_and_children() {
        let mut a = process(1, "svc-a", 10.0);
        a.child_process_names.insert("worker".into());
        let mut b = process(2, "svc-b", 30.0);
        b.service_identities.push("svc-a".into());
        b.child_process_names.insert("helper".into());

        let merged = ProcessRecord::merge(&[a, b]).unwrap();
        assert_eq!(merged.service_identities, vec!["svc-a", "svc-b"]);
        assert_eq!(merged.child_process_names.len(), 2);
        assert_eq!(merged.cpu_percent, 20.0);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = process(1, "svc-a", 10.0);
        let mut b = process(2, "svc-a", 35.0);
        b.ram_mb = 1024;
        b.ram_percent = 6.5;
        b.counts = Counts::new(3, 0, 4);

        let ab = ProcessRecord::merge(&[a.clone(), b.clone()]).unwrap();
        let ba = ProcessRecord::merge(&[b, a]).unwrap();
        assert_eq!(ab.cpu_percent, 22.5);
        assert_eq!(ab.cpu_percent, ba.cpu_percent);
        assert_eq!(ab.ram_mb, ba.ram_mb);
        assert_eq!(ab.ram_percent, ba.ram_percent);
        assert_eq!(ab.counts, ba.counts);
        assert_eq!(ab.process_id, ba.process_id);
    }

    #[test]
    fn test_merge_tolerates_empty_children() {
        let a = process(1, "svc", 10.0);
        let mut b = process(1, "svc", 10.0);
        b.child_process_names.insert("child".into());
        let merged = ProcessRecord::merge(&[a, b]).unwrap();
        assert_eq!(merged.child_process_names.len(), 1);
    }

    #[test]
    fn test_grouping_keys() {
        let mut p = process(7, "svc-b", 0.0);
        p.service_identities.push("svc-a".into());
        assert_eq!(ProcessGrouping::FirstIdentity.key(&p), "svc-b");
        assert_eq!(ProcessGrouping::AllIdentities.key(&p), "svc-a|svc-b");

        p.service_identities.clear();
        assert_eq!(ProcessGrouping::FirstIdentity.key(&p), "pid:7");
    }

    #[test]
    fn test_merge_grouped_separates_shared_processes() {
        let solo = process(1, "svc-a", 10.0);
        let mut shared = process(2, "svc-a", 50.0);
        shared.service_identities.push("svc-b".into());

        let first = merge_grouped(vec![solo.clone(), shared.clone()], ProcessGrouping::FirstIdentity);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].cpu_percent, 30.0);

        let all = merge_grouped(vec![solo, shared], ProcessGrouping::AllIdentities);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].cpu_percent, 10.0);
        assert_eq!(all[1].cpu_percent, 50.0);
    }

    #[test]
    fn test_grouping_from_str() {
        assert_eq!("all_identities".parse(), Ok(ProcessGrouping::AllIdentities));
        assert!("bogus".parse::<ProcessGrouping>().is_err());
    }
}
