//! Generate testdata command implementation.
//!
//! Produces synthetic NodeData and ClusterData records on interval boundaries,
//! written to a JSON file or pushed to an aggregator.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::client::AggregatorClient;
use crate::clock;
use crate::codec;
use crate::records::{ClusterData, Counts, Drive, Hardware, NodeData, ProcessRecord};
use crate::store::CLUSTER_QUEUE;

const SERVICES: &[(&str, &str)] = &[
    ("fabric:/Shop/Web", "ShopWeb"),
    ("fabric:/Shop/Cart", "ShopCart"),
    ("fabric:/Shop/Orders", "ShopOrders"),
    ("fabric:/Billing/Ledger", "Ledger"),
];

/// Root structure for the generated JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestData {
    pub version: String,
    pub generated_at: String,
    pub interval_ms: u64,
    pub nodes: Vec<NodeData>,
    pub cluster: Vec<ClusterData>,
}

/// Generates synthetic records and writes or pushes them.
pub async fn command_generate_testdata(
    nodes: usize,
    intervals: usize,
    interval_ms: u64,
    output: PathBuf,
    push: Option<&dyn AggregatorClient>,
) -> anyhow::Result<()> {
    debug!(
        "Generating test data: nodes={}, intervals={}, interval_ms={}",
        nodes, intervals, interval_ms
    );

    let now = clock::now_ms() as u64;
    let end_ms = now - now % interval_ms.max(1);
    let data = generate_records(&mut rand::thread_rng(), nodes, intervals, interval_ms, end_ms);

    match push {
        Some(client) => {
            push_records(client, &data).await?;
            println!(
                "✅ Pushed {} node records and {} cluster records",
                data.nodes.len(),
                data.cluster.len()
            );
        }
        None => {
            let json_content = serde_json::to_string_pretty(&data)?;
            fs::write(&output, &json_content)?;
            println!(
                "✅ Generated test data: {} node records, {} cluster records in {}",
                data.nodes.len(),
                data.cluster.len(),
                output.display()
            );
        }
    }

    Ok(())
}

/// Builds `intervals` aligned samples per node, ending at `end_ms`.
pub fn generate_records(
    rng: &mut impl Rng,
    nodes: usize,
    intervals: usize,
    interval_ms: u64,
    end_ms: u64,
) -> TestData {
    let node_names: Vec<String> = (0..nodes).map(|i| format!("node-{}", i)).collect();
    let mut node_records = Vec::with_capacity(nodes * intervals);
    let mut cluster_records = Vec::with_capacity(intervals);

    for step in 0..intervals {
        let back = (intervals - 1 - step) as u64 * interval_ms;
        let ts = end_ms.saturating_sub(back) as f64;

        let mut total = Counts::default();
        for name in &node_names {
            let node = generate_node(rng, name, ts);
            for p in &node.processes {
                total = total.add(&p.counts);
            }
            node_records.push(node);
        }
        cluster_records.push(ClusterData {
            timestamp_ms: ts,
            counts: total,
        });
    }

    TestData {
        version: "1.0".to_string(),
        generated_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        interval_ms,
        nodes: node_records,
        cluster: cluster_records,
    }
}

/// Pushes records in timestamp order so queues stay aligned.
pub async fn push_records(client: &dyn AggregatorClient, data: &TestData) -> anyhow::Result<()> {
    for cluster in &data.cluster {
        for node in data.nodes.iter().filter(|n| n.timestamp_ms == cluster.timestamp_ms) {
            client.put_data(&node.node_name, codec::encode(node)?).await?;
        }
        client.put_data(CLUSTER_QUEUE, codec::encode(cluster)?).await?;
    }
    info!(
        "Pushed {} intervals of synthetic data",
        data.cluster.len()
    );
    Ok(())
}

fn generate_node(rng: &mut impl Rng, name: &str, ts: f64) -> NodeData {
    let mut processes = Vec::new();
    for (i, (service, exe)) in SERVICES.iter().enumerate() {
        if rng.gen_bool(0.75) {
            processes.push(generate_process(rng, 2000 + i as i64, service, exe));
        }
    }

    NodeData {
        timestamp_ms: ts,
        node_name: name.to_string(),
        hardware: generate_hardware(rng, 5.0..95.0),
        processes,
        platform_hardware: generate_hardware(rng, 0.5..8.0),
    }
}

fn generate_hardware(rng: &mut impl Rng, cpu: std::ops::Range<f64>) -> Hardware {
    let total_memory_gb: u64 = *[8u64, 16, 32, 64]
        .get(rng.gen_range(0..4))
        .unwrap_or(&16);
    let percent_memory_in_use: f64 = rng.gen_range(10.0..90.0);
    let total_space_gb: u64 = rng.gen_range(100..1000);

    Hardware {
        cpu_percent: rng.gen_range(cpu),
        total_memory_gb,
        memory_in_use_mb: (total_memory_gb as f64 * 1024.0 * percent_memory_in_use / 100.0) as u64,
        percent_memory_in_use,
        drives: vec![Drive {
            name: "/".to_string(),
            total_space_gb,
            available_space_gb: rng.gen_range(0..total_space_gb),
        }],
    }
}

fn generate_process(rng: &mut impl Rng, pid: i64, service: &str, exe: &str) -> ProcessRecord {
    ProcessRecord {
        process_id: pid,
        cpu_percent: rng.gen_range(0.0..25.0),
        ram_mb: rng.gen_range(64..4096),
        ram_percent: rng.gen_range(0.1..10.0),
        service_identities: vec![service.to_string()],
        child_process_names: std::iter::once(format!("{}.Worker", exe)).collect(),
        counts: Counts::new(rng.gen_range(0..2), rng.gen_range(0..4), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::check_time;
    use crate::service::SnapshotService;
    use crate::store::{MemoryQueueStore, QueueStore};
    use rand::{rngs::StdRng, SeedableRng};
    use std::sync::Arc;

    #[test]
    fn test_records_land_on_boundaries() {
        let mut rng = StdRng::seed_from_u64(7);
        let data = generate_records(&mut rng, 3, 4, 1000, 10_000);
        assert_eq!(data.nodes.len(), 12);
        assert_eq!(data.cluster.len(), 4);

        let stamps: Vec<f64> = data.cluster.iter().map(|c| c.timestamp_ms).collect();
        assert_eq!(stamps, vec![7000.0, 8000.0, 9000.0, 10_000.0]);

        for node in &data.nodes {
            assert!(stamps.contains(&node.timestamp_ms));
            assert!(node.hardware.disk_percent_in_use() >= 0.0);
        }
        // neighbouring intervals never align with each other
        assert!(!check_time(stamps[0], stamps[1], 1000));
    }

    #[tokio::test]
    async fn test_push_fills_every_queue() {
        let store = Arc::new(MemoryQueueStore::new());
        let svc = SnapshotService::new(store.clone());
        let mut rng = StdRng::seed_from_u64(1);
        let data = generate_records(&mut rng, 2, 3, 1000, 5000);

        push_records(&svc, &data).await.unwrap();
        assert_eq!(store.len(CLUSTER_QUEUE).await.unwrap(), 3);
        assert_eq!(store.len("node-0").await.unwrap(), 3);
        assert_eq!(store.len("node-1").await.unwrap(), 3);
    }
}
