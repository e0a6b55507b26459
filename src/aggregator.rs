//! Snapshot aggregator.
//!
//! Once per interval the aggregator drains the node and cluster queues into
//! time-aligned snapshots. Every attempt picks the oldest head across all
//! queues as the alignment pivot and fuses every head within one interval of
//! it with the cluster head.
//!
//! Consumption is two-phase. Heads are only peeked while a snapshot is
//! assembled, and the accepted heads are dequeued after the snapshot has been
//! persisted, so a failed attempt never loses data. Heads that can never
//! align again are evicted so the queues keep moving:
//!
//! - cluster head at or beyond `pivot + interval`: node heads older than
//!   `cluster - interval` have no cluster data left to pair with;
//! - cluster head aligned, every listed node has a queued head and all of
//!   them lie at or beyond `cluster + interval`: the cluster head has no node
//!   data left. While any node queue is empty the cluster head is kept.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::clock;
use crate::codec::{self, CodecError, QueueRecord};
use crate::health_stats::HealthStats;
use crate::metrics::AggregatorMetrics;
use crate::provider::{ClusterInfoProvider, ProviderError};
use crate::records::{ClusterData, NodeData, Snapshot, Timestamped};
use crate::store::{
    open_queue_with_retry, QueueStore, StoreError, CLUSTER_QUEUE, QUEUE_RETRY_DELAY,
    SNAPSHOT_QUEUE,
};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("listing nodes failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("encoding snapshot failed: {0}")]
    Codec(#[from] CodecError),
    #[error("node listing task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result of a single snapshot attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ProduceOutcome {
    /// A snapshot was persisted and its source heads consumed.
    Produced(Snapshot),
    /// Every node queue and the cluster queue is empty.
    QueuesEmpty,
    /// No snapshot could be aligned. `evicted` heads were dropped as stale.
    NotAligned { evicted: usize },
}

/// True when `timestamp_ms` lies strictly within one interval of `pivot_ms`.
pub fn check_time(pivot_ms: f64, timestamp_ms: f64, interval_ms: u64) -> bool {
    (pivot_ms - timestamp_ms).abs() < interval_ms as f64
}

pub struct Aggregator {
    store: Arc<dyn QueueStore>,
    provider: Arc<dyn ClusterInfoProvider>,
    interval_ms: u64,
    retry_delay: Duration,
    metrics: Option<AggregatorMetrics>,
    health: Arc<HealthStats>,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn QueueStore>,
        provider: Arc<dyn ClusterInfoProvider>,
        interval_ms: u64,
        health: Arc<HealthStats>,
    ) -> Self {
        Self {
            store,
            provider,
            interval_ms,
            retry_delay: QUEUE_RETRY_DELAY,
            metrics: None,
            health,
        }
    }

    pub fn with_metrics(mut self, metrics: AggregatorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Drains once per interval boundary until cancelled.
    ///
    /// A failed drain is reported as a health warning and retried on the
    /// next boundary.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AggregateError> {
        info!(interval_ms = self.interval_ms, "aggregator started");
        for queue in [CLUSTER_QUEUE, SNAPSHOT_QUEUE] {
            match open_queue_with_retry(self.store.as_ref(), queue, self.retry_delay, &cancel).await
            {
                Err(StoreError::Cancelled) => return Ok(()),
                other => other?,
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("aggregator stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(clock::until_next_boundary(self.interval_ms)) => {}
            }

            match self.drain(&cancel).await {
                Ok(produced) => debug!(produced, "drain cycle finished"),
                Err(AggregateError::Store(StoreError::Cancelled)) => return Ok(()),
                Err(e) => self
                    .health
                    .report_warning("aggregator", &format!("drain failed: {}", e)),
            }
        }
    }

    /// Produces snapshots while every node queue and the cluster queue holds
    /// more than one item and attempts keep making progress.
    ///
    /// Returns the number of snapshots produced.
    #[instrument(skip(self, cancel))]
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<u64, AggregateError> {
        let start = Instant::now();
        let mut produced = 0u64;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let nodes = self.list_nodes().await?;
            for node in &nodes {
                open_queue_with_retry(self.store.as_ref(), node, self.retry_delay, cancel).await?;
            }

            let min_depth = self.min_queue_depth(&nodes).await?;
            if min_depth <= 1 {
                debug!(min_depth, "backlog drained");
                break;
            }

            match self.produce_snapshot().await? {
                ProduceOutcome::Produced(_) => produced += 1,
                ProduceOutcome::NotAligned { evicted } if evicted > 0 => {}
                outcome => {
                    debug!(?outcome, "attempt made no progress, ending drain");
                    break;
                }
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        if let Some(m) = &self.metrics {
            m.drain_duration.set(elapsed);
            if let Ok(depth) = self.store.len(SNAPSHOT_QUEUE).await {
                m.set_queue_depth(SNAPSHOT_QUEUE, depth);
            }
        }
        self.health.record_drain(produced, elapsed);
        if produced > 0 {
            info!(produced, elapsed_ms = elapsed * 1000.0, "drain produced snapshots");
        }
        Ok(produced)
    }

    /// Attempts to assemble, persist and consume one snapshot.
    pub async fn produce_snapshot(&self) -> Result<ProduceOutcome, AggregateError> {
        let nodes = self.list_nodes().await?;
        let cluster = self.peek_head::<ClusterData>(CLUSTER_QUEUE).await?;
        let node_count = nodes.len();
        let mut node_heads: Vec<(String, NodeData)> = Vec::with_capacity(node_count);
        for node in nodes {
            if let Some(head) = self.peek_head::<NodeData>(&node).await? {
                node_heads.push((node, head));
            }
        }

        let Some(pivot) = min_timestamp(cluster.as_ref(), &node_heads) else {
            return Ok(ProduceOutcome::QueuesEmpty);
        };

        let Some(cluster) = cluster else {
            debug!(pivot, "no cluster data queued");
            return Ok(self.miss(0));
        };

        let cluster_ts = cluster.timestamp_ms();
        if !check_time(pivot, cluster_ts, self.interval_ms) {
            let mut evicted = 0;
            for (queue, head) in &node_heads {
                let ts = head.timestamp_ms();
                if ts < cluster_ts && !check_time(cluster_ts, ts, self.interval_ms) {
                    self.evict(queue, ts, "older than every remaining cluster record")
                        .await?;
                    evicted += 1;
                }
            }
            return Ok(self.miss(evicted));
        }

        let (accepted, rest): (Vec<_>, Vec<_>) = node_heads
            .into_iter()
            .partition(|(_, head)| check_time(pivot, head.timestamp_ms(), self.interval_ms));

        if accepted.is_empty() {
            let mut evicted = 0;
            // an empty node queue may still receive a record for this cluster head
            let every_node_past = rest.len() == node_count
                && rest.iter().all(|(_, head)| {
                    head.timestamp_ms() >= cluster_ts + self.interval_ms as f64
                });
            if !rest.is_empty() && every_node_past {
                self.evict(CLUSTER_QUEUE, cluster_ts, "older than every queued node record")
                    .await?;
                evicted = 1;
            }
            return Ok(self.miss(evicted));
        }

        let (queues, node_data): (Vec<String>, Vec<NodeData>) = accepted.into_iter().unzip();
        let snapshot = Snapshot::new(pivot, cluster, node_data);
        let payload = codec::encode(&snapshot)?;

        self.store.enqueue(SNAPSHOT_QUEUE, payload).await?;
        self.store.dequeue(CLUSTER_QUEUE).await?;
        for queue in &queues {
            self.store.dequeue(queue).await?;
        }

        if let Some(m) = &self.metrics {
            m.observe_snapshot(&snapshot);
        }
        debug!(
            pivot,
            nodes = queues.len(),
            deferred = rest.len(),
            "snapshot produced"
        );
        Ok(ProduceOutcome::Produced(snapshot))
    }

    /// Oldest head timestamp across the cluster queue and every node queue.
    pub async fn min_timestamp_in_queues(&self) -> Result<Option<f64>, AggregateError> {
        let cluster = self.peek_head::<ClusterData>(CLUSTER_QUEUE).await?;
        let mut heads = Vec::new();
        for node in self.list_nodes().await? {
            if let Some(head) = self.peek_head::<NodeData>(&node).await? {
                heads.push((node, head));
            }
        }
        Ok(min_timestamp(cluster.as_ref(), &heads))
    }

    async fn list_nodes(&self) -> Result<Vec<String>, AggregateError> {
        let provider = Arc::clone(&self.provider);
        Ok(tokio::task::spawn_blocking(move || provider.list_nodes()).await??)
    }

    async fn min_queue_depth(&self, nodes: &[String]) -> Result<usize, AggregateError> {
        let mut min_depth = usize::MAX;
        for queue in nodes.iter().map(String::as_str).chain([CLUSTER_QUEUE]) {
            let depth = self.store.len(queue).await?;
            if let Some(m) = &self.metrics {
                m.set_queue_depth(queue, depth);
            }
            min_depth = min_depth.min(depth);
        }
        Ok(min_depth)
    }

    /// Decoded head of `queue`. Undecodable heads are dropped until a valid
    /// one surfaces or the queue is empty.
    async fn peek_head<T: QueueRecord>(&self, queue: &str) -> Result<Option<T>, AggregateError> {
        while let Some(bytes) = self.store.peek(queue).await? {
            match codec::decode::<T>(&bytes) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    warn!(queue, bytes = bytes.len(), "dropping undecodable head: {}", e);
                    if let Some(m) = &self.metrics {
                        m.decode_errors.with_label_values(&[queue]).inc();
                    }
                    self.store.dequeue(queue).await?;
                }
            }
        }
        Ok(None)
    }

    async fn evict(&self, queue: &str, timestamp_ms: f64, reason: &str) -> Result<(), AggregateError> {
        warn!(queue, timestamp_ms, "evicting stale head: {}", reason);
        self.store.dequeue(queue).await?;
        if let Some(m) = &self.metrics {
            m.evicted_items.with_label_values(&[queue]).inc();
        }
        Ok(())
    }

    fn miss(&self, evicted: usize) -> ProduceOutcome {
        if let Some(m) = &self.metrics {
            m.alignment_misses.inc();
        }
        ProduceOutcome::NotAligned { evicted }
    }
}

fn min_timestamp(cluster: Option<&ClusterData>, nodes: &[(String, NodeData)]) -> Option<f64> {
    cluster
        .map(Timestamped::timestamp_ms)
        .into_iter()
        .chain(nodes.iter().map(|(_, n)| n.timestamp_ms()))
        .min_by(f64::total_cmp)
}
