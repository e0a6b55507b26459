//! Per-node collectors.
//!
//! A [`Collector`] runs two loops over one shared batch. The batching loop
//! samples a record every tenth of the interval; the publish loop wakes on
//! each interval boundary, merges whatever accumulated and pushes the merged
//! record to the aggregator. An empty batch publishes nothing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{AggregatorClient, ClientError};
use crate::clock;
use crate::codec::{self, CodecError, QueueRecord};
use crate::health_stats::HealthStats;
use crate::provider::{ClusterInfoProvider, ProviderError};
use crate::records::{ClusterData, MergeOptions, MetricRecord, NodeData, ProcessRecord};
use crate::store::CLUSTER_QUEUE;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("collection failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("encoding failed: {0}")]
    Codec(#[from] CodecError),
    #[error("publish failed: {0}")]
    Client(#[from] ClientError),
    #[error("collection task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("batch lock poisoned")]
    Poisoned,
}

/// A source of one record type, sampled on the blocking pool.
pub trait Collect: Send + Sync + 'static {
    type Record: MetricRecord + QueueRecord + Send + 'static;

    /// Queue the merged records are published to.
    fn queue_name(&self) -> String;

    /// Takes one sample. May block on platform calls.
    fn collect(&self) -> Result<Self::Record, CollectError>;
}

/// Samples hardware and service-process usage of one node.
pub struct NodeCollector {
    provider: Arc<dyn ClusterInfoProvider>,
    node_name: String,
}

impl NodeCollector {
    pub fn new(provider: Arc<dyn ClusterInfoProvider>, node_name: impl Into<String>) -> Self {
        Self {
            provider,
            node_name: node_name.into(),
        }
    }
}

impl Collect for NodeCollector {
    type Record = NodeData;

    fn queue_name(&self) -> String {
        self.node_name.clone()
    }

    fn collect(&self) -> Result<NodeData, CollectError> {
        let timestamp_ms = clock::now_ms();
        let hardware = self.provider.hardware(&self.node_name)?;
        let platform_hardware = self.provider.platform_hardware(&self.node_name)?;

        let mut processes = Vec::new();
        for sp in self.provider.list_processes(&self.node_name)? {
            let Some(usage) = self.provider.resource_usage_for_process(sp.process_id)? else {
                debug!(pid = sp.process_id, "service process exited before sampling");
                continue;
            };
            processes.push(ProcessRecord {
                process_id: sp.process_id,
                cpu_percent: usage.cpu_percent,
                ram_mb: usage.ram_mb,
                ram_percent: usage.ram_percent,
                service_identities: sp.service_identities,
                child_process_names: sp.child_process_names,
                counts: sp.counts,
            });
        }

        Ok(NodeData {
            timestamp_ms,
            node_name: self.node_name.clone(),
            hardware,
            processes,
            platform_hardware,
        })
    }
}

/// Samples cluster-wide topology counts.
pub struct ClusterCollector {
    provider: Arc<dyn ClusterInfoProvider>,
}

impl ClusterCollector {
    pub fn new(provider: Arc<dyn ClusterInfoProvider>) -> Self {
        Self { provider }
    }
}

impl Collect for ClusterCollector {
    type Record = ClusterData;

    fn queue_name(&self) -> String {
        CLUSTER_QUEUE.to_string()
    }

    fn collect(&self) -> Result<ClusterData, CollectError> {
        Ok(ClusterData {
            timestamp_ms: clock::now_ms(),
            counts: self.provider.cluster_counts()?,
        })
    }
}

pub struct Collector<C: Collect> {
    source: Arc<C>,
    client: Arc<dyn AggregatorClient>,
    interval_ms: u64,
    merge: MergeOptions,
    batch: Arc<Mutex<Vec<C::Record>>>,
    health: Arc<HealthStats>,
}

impl<C: Collect> Collector<C> {
    pub fn new(
        source: C,
        client: Arc<dyn AggregatorClient>,
        interval_ms: u64,
        merge: MergeOptions,
        health: Arc<HealthStats>,
    ) -> Self {
        Self {
            source: Arc::new(source),
            client,
            interval_ms,
            merge,
            batch: Arc::new(Mutex::new(Vec::new())),
            health,
        }
    }

    fn batch_period(&self) -> Duration {
        Duration::from_millis((self.interval_ms / 10).max(1))
    }

    /// Runs both loops until `cancel` fires or either loop fails.
    ///
    /// A failure is reported as a health warning before it is returned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), CollectError> {
        let queue = self.source.queue_name();
        info!(
            queue = %queue,
            interval_ms = self.interval_ms,
            "collector started"
        );

        let result = tokio::try_join!(self.batch_loop(&cancel), self.publish_loop(&cancel));
        match result {
            Ok(_) => {
                info!(queue = %queue, "collector stopped");
                Ok(())
            }
            Err(e) => {
                self.health
                    .report_warning("collector", &format!("queue {}: {}", queue, e));
                Err(e)
            }
        }
    }

    async fn batch_loop(&self, cancel: &CancellationToken) -> Result<(), CollectError> {
        let mut ticker = tokio::time::interval(self.batch_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            self.sample_once().await?;
        }
    }

    async fn publish_loop(&self, cancel: &CancellationToken) -> Result<(), CollectError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(clock::until_next_boundary(self.interval_ms)) => {}
            }
            self.publish_once().await?;
        }
    }

    /// Takes one sample on the blocking pool and appends it to the batch.
    pub async fn sample_once(&self) -> Result<(), CollectError> {
        let source = Arc::clone(&self.source);
        let record = tokio::task::spawn_blocking(move || source.collect()).await??;
        self.batch
            .lock()
            .map_err(|_| CollectError::Poisoned)?
            .push(record);
        Ok(())
    }

    /// Merges and publishes the pending batch. Returns whether anything was sent.
    pub async fn publish_once(&self) -> Result<bool, CollectError> {
        let pending = {
            let mut batch = self.batch.lock().map_err(|_| CollectError::Poisoned)?;
            std::mem::take(&mut *batch)
        };

        let queue = self.source.queue_name();
        let Some(merged) = C::Record::merge_with(&pending, &self.merge) else {
            debug!(queue = %queue, "batch empty, skipping publish");
            return Ok(false);
        };

        let payload = codec::encode(&merged)?;
        debug!(
            queue = %queue,
            samples = pending.len(),
            bytes = payload.len(),
            "publishing merged batch"
        );
        self.client.put_data(&queue, payload).await?;
        self.health.record_publish(pending.len());
        Ok(true)
    }

    pub fn pending(&self) -> usize {
        self.batch.lock().map(|b| b.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProcessUsage, ServiceProcess};
    use crate::records::fixtures::hardware;
    use crate::records::{Counts, Hardware};
    use crate::service::SnapshotService;
    use crate::store::{MemoryQueueStore, QueueStore};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeProvider {
        cpu: AtomicU64,
        fail: bool,
    }

    impl ClusterInfoProvider for FakeProvider {
        fn list_nodes(&self) -> Result<Vec<String>, ProviderError> {
            Ok(vec!["node-0".into()])
        }
        fn list_processes(&self, _node: &str) -> Result<Vec<ServiceProcess>, ProviderError> {
            Ok(vec![
                ServiceProcess {
                    process_id: 10,
                    service_identities: vec!["svc".into()],
                    child_process_names: Default::default(),
                    counts: Counts::new(1, 0, 0),
                },
                ServiceProcess {
                    process_id: 11,
                    service_identities: vec!["gone".into()],
                    child_process_names: Default::default(),
                    counts: Counts::default(),
                },
            ])
        }
        fn resource_usage_for_process(
            &self,
            pid: i64,
        ) -> Result<Option<ProcessUsage>, ProviderError> {
            Ok((pid == 10).then_some(ProcessUsage {
                cpu_percent: 5.0,
                ram_mb: 100,
                ram_percent: 1.0,
            }))
        }
        fn hardware(&self, node: &str) -> Result<Hardware, ProviderError> {
            if self.fail {
                return Err(ProviderError::UnknownNode(node.to_string()));
            }
            let cpu = self.cpu.fetch_add(20, Ordering::SeqCst) as f64;
            Ok(hardware(cpu, 50.0))
        }
        fn platform_hardware(&self, _node: &str) -> Result<Hardware, ProviderError> {
            Ok(hardware(1.0, 1.0))
        }
        fn cluster_counts(&self) -> Result<Counts, ProviderError> {
            Ok(Counts::new(3, 6, 0))
        }
    }

    fn fake(fail: bool) -> Arc<dyn ClusterInfoProvider> {
        Arc::new(FakeProvider {
            cpu: AtomicU64::new(10),
            fail,
        })
    }

    #[test]
    fn test_node_collector_skips_exited_processes() {
        let record = NodeCollector::new(fake(false), "node-0").collect().unwrap();
        assert_eq!(record.node_name, "node-0");
        assert_eq!(record.processes.len(), 1);
        assert_eq!(record.processes[0].process_id, 10);
        assert_eq!(record.processes[0].ram_mb, 100);
        assert!(record.timestamp_ms > 0.0);
    }

    #[tokio::test]
    async fn test_publish_merges_batch_and_skips_empty() {
        let store = Arc::new(MemoryQueueStore::new());
        let client = Arc::new(SnapshotService::new(store.clone()));
        let collector = Collector::new(
            NodeCollector::new(fake(false), "node-0"),
            client,
            1000,
            MergeOptions::default(),
            Arc::new(HealthStats::new()),
        );

        assert!(!collector.publish_once().await.unwrap());
        assert_eq!(store.len("node-0").await.unwrap(), 0);

        collector.sample_once().await.unwrap();
        collector.sample_once().await.unwrap();
        assert_eq!(collector.pending(), 2);

        assert!(collector.publish_once().await.unwrap());
        assert_eq!(collector.pending(), 0);

        let payloads = store.list("node-0").await.unwrap();
        assert_eq!(payloads.len(), 1);
        let merged: NodeData = codec::decode(&payloads[0]).unwrap();
        // samples at 10% and 30%
        assert_eq!(merged.hardware.cpu_percent, 20.0);
        assert_eq!(merged.processes[0].process_id, crate::records::SYNTHETIC_PROCESS_ID);
    }

    #[tokio::test]
    async fn test_cluster_collector_publishes_to_cluster_queue() {
        let store = Arc::new(MemoryQueueStore::new());
        let collector = Collector::new(
            ClusterCollector::new(fake(false)),
            Arc::new(SnapshotService::new(store.clone())),
            1000,
            MergeOptions::default(),
            Arc::new(HealthStats::new()),
        );
        collector.sample_once().await.unwrap();
        collector.publish_once().await.unwrap();

        let payloads = store.list(CLUSTER_QUEUE).await.unwrap();
        let cluster: ClusterData = codec::decode(&payloads[0]).unwrap();
        assert_eq!(cluster.counts, Counts::new(3, 6, 0));
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_returned() {
        let health = Arc::new(HealthStats::new());
        let collector = Collector::new(
            NodeCollector::new(fake(true), "node-0"),
            Arc::new(SnapshotService::new(Arc::new(MemoryQueueStore::new()))),
            100,
            MergeOptions::default(),
            health.clone(),
        );
        let result = collector.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(CollectError::Provider(_))));
        assert_eq!(health.warnings(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let collector = Collector::new(
            ClusterCollector::new(fake(false)),
            Arc::new(SnapshotService::new(Arc::new(MemoryQueueStore::new()))),
            60_000,
            MergeOptions::default(),
            Arc::new(HealthStats::new()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        collector.run(cancel).await.unwrap();
    }
}
