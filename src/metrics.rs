//! Prometheus metrics for the aggregator.
//!
//! Queue depths are refreshed on every drain; snapshot gauges describe the
//! most recently produced snapshot.

use prometheus::{Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry};

use crate::records::{Snapshot, Timestamped};

#[derive(Clone)]
pub struct AggregatorMetrics {
    pub queue_depth: GaugeVec,
    pub snapshots_produced: IntCounter,
    pub alignment_misses: IntCounter,
    pub evicted_items: IntCounterVec,
    pub decode_errors: IntCounterVec,
    pub drain_duration: Gauge,

    // Latest snapshot
    pub cluster_cpu_percent: Gauge,
    pub cluster_ram_percent: Gauge,
    pub cluster_disk_percent: Gauge,
    pub capacity_estimate: Gauge,
    pub snapshot_nodes: Gauge,
    pub snapshot_timestamp: Gauge,
}

impl AggregatorMetrics {
    /// Creates and registers all aggregator metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let queue_depth = GaugeVec::new(
            Opts::new(
                "herakles_snapshot_queue_depth",
                "Pending items per queue",
            ),
            &["queue"],
        )?;
        let snapshots_produced = IntCounter::new(
            "herakles_snapshot_produced_total",
            "Snapshots assembled and persisted",
        )?;
        let alignment_misses = IntCounter::new(
            "herakles_snapshot_alignment_misses_total",
            "Snapshot attempts that found no time-aligned data",
        )?;
        let evicted_items = IntCounterVec::new(
            Opts::new(
                "herakles_snapshot_evicted_total",
                "Queue heads dropped because they can no longer align",
            ),
            &["queue"],
        )?;
        let decode_errors = IntCounterVec::new(
            Opts::new(
                "herakles_snapshot_decode_errors_total",
                "Queue payloads dropped because they failed to decode",
            ),
            &["queue"],
        )?;
        let drain_duration = Gauge::with_opts(Opts::new(
            "herakles_snapshot_drain_duration_seconds",
            "Duration of the last drain cycle",
        ))?;

        let cluster_cpu_percent = Gauge::with_opts(Opts::new(
            "herakles_snapshot_cluster_cpu_percent",
            "Average node CPU usage in the latest snapshot",
        ))?;
        let cluster_ram_percent = Gauge::with_opts(Opts::new(
            "herakles_snapshot_cluster_ram_percent",
            "Average node memory usage in the latest snapshot",
        ))?;
        let cluster_disk_percent = Gauge::with_opts(Opts::new(
            "herakles_snapshot_cluster_disk_percent",
            "Average node disk usage in the latest snapshot (-1 without drive data)",
        ))?;
        let capacity_estimate = Gauge::with_opts(Opts::new(
            "herakles_snapshot_capacity_estimate",
            "Replicas the cluster could hold at full use of its tightest resource (-1 when unknown)",
        ))?;
        let snapshot_nodes = Gauge::with_opts(Opts::new(
            "herakles_snapshot_nodes",
            "Nodes present in the latest snapshot",
        ))?;
        let snapshot_timestamp = Gauge::with_opts(Opts::new(
            "herakles_snapshot_timestamp_ms",
            "Alignment timestamp of the latest snapshot",
        ))?;

        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(snapshots_produced.clone()))?;
        registry.register(Box::new(alignment_misses.clone()))?;
        registry.register(Box::new(evicted_items.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(drain_duration.clone()))?;
        registry.register(Box::new(cluster_cpu_percent.clone()))?;
        registry.register(Box::new(cluster_ram_percent.clone()))?;
        registry.register(Box::new(cluster_disk_percent.clone()))?;
        registry.register(Box::new(capacity_estimate.clone()))?;
        registry.register(Box::new(snapshot_nodes.clone()))?;
        registry.register(Box::new(snapshot_timestamp.clone()))?;

        Ok(Self {
            queue_depth,
            snapshots_produced,
            alignment_misses,
            evicted_items,
            decode_errors,
            drain_duration,
            cluster_cpu_percent,
            cluster_ram_percent,
            cluster_disk_percent,
            capacity_estimate,
            snapshot_nodes,
            snapshot_timestamp,
        })
    }

    pub fn set_queue_depth(&self, queue: &str, depth: usize) {
        self.queue_depth.with_label_values(&[queue]).set(depth as f64);
    }

    pub fn observe_snapshot(&self, snapshot: &Snapshot) {
        self.snapshots_produced.inc();
        self.cluster_cpu_percent.set(snapshot.average_cpu_percent());
        self.cluster_ram_percent.set(snapshot.average_ram_percent());
        self.cluster_disk_percent.set(snapshot.average_disk_percent());
        self.capacity_estimate
            .set(snapshot.capacity_estimate().map_or(-1.0, |c| c as f64));
        self.snapshot_nodes.set(snapshot.nodes().len() as f64);
        self.snapshot_timestamp.set(snapshot.timestamp_ms());
    }
}
