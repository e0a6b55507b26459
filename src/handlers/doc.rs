//! Documentation endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::handlers::health::FOOTER_TEXT;
use crate::state::SharedState;

/// Handler for the /doc endpoint.
#[instrument(skip(state))]
pub async fn doc_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /doc request");
    state.health_stats.record_request();

    let version = env!("CARGO_PKG_VERSION");
    let interval = state.config.interval_ms();
    let doc = format!(
        r#"HERAKLES CLUSTER SNAPSHOT - DOCUMENTATION
=========================================

VERSION: {version}
DESCRIPTION: Cluster metric collectors and a time-aligned snapshot aggregator
INTERVAL: {interval} ms

HTTP ENDPOINTS
--------------
POST   /queues/{{name}}        - Append an encoded record to a queue
GET    /queues/{{name}}        - Pending payloads of a queue (JSON byte arrays)
GET    /snapshots              - Snapshots in [low, high] (query: low, high)
GET    /snapshots/average      - One snapshot averaged over [low, high]
DELETE /snapshots              - Delete every stored snapshot
GET    /metrics                - Prometheus metrics endpoint
GET    /health                 - Health check with internal statistics (plain text)
GET    /doc                    - This documentation (plain text)

QUEUES
------
<node name>     - Averaged NodeData, one queue per node
ClusterData     - Averaged cluster topology counts
Snapshots       - Finished snapshots

AVAILABLE METRICS
-----------------
herakles_snapshot_queue_depth{{queue}}          - Pending items per queue
herakles_snapshot_produced_total              - Snapshots assembled
herakles_snapshot_alignment_misses_total      - Attempts without aligned data
herakles_snapshot_evicted_total{{queue}}        - Stale heads dropped
herakles_snapshot_decode_errors_total{{queue}}  - Undecodable payloads dropped
herakles_snapshot_cluster_cpu_percent         - Latest snapshot CPU average
herakles_snapshot_cluster_ram_percent         - Latest snapshot RAM average
herakles_snapshot_cluster_disk_percent        - Latest snapshot disk average
herakles_snapshot_capacity_estimate           - Latest snapshot capacity estimate

CLI COMMANDS
------------
herakles-cluster-snapshot                     - Start the aggregator
herakles-cluster-snapshot collect             - Run the node collector
herakles-cluster-snapshot collect-cluster     - Run the cluster collector
herakles-cluster-snapshot query --from N      - Query snapshots
herakles-cluster-snapshot delete-snapshots    - Delete every snapshot
herakles-cluster-snapshot check --all         - Validate system requirements
herakles-cluster-snapshot config -o cfg.yaml  - Generate config file
herakles-cluster-snapshot generate-testdata   - Produce synthetic records

EXAMPLE USAGE
-------------
curl 'http://localhost:9216/snapshots?low=0&high=99999999999999'
curl 'http://localhost:9216/snapshots/average?low=1700000000000'

{FOOTER_TEXT}
"#
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        doc,
    )
}
