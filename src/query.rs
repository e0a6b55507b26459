//! Read-side access to persisted snapshots.

use tracing::{debug, warn};

use crate::codec;
use crate::records::{MergeOptions, MetricRecord, Snapshot, Timestamped};
use crate::store::{QueueStore, StoreResult, SNAPSHOT_QUEUE};

/// Returns snapshots with `low <= timestamp <= high`, oldest first.
///
/// The snapshot queue is scanned without consuming it. Payloads that fail to
/// decode are skipped, so missing or damaged data shortens the result rather
/// than failing the query.
pub async fn get_snapshots_in_range(
    store: &dyn QueueStore,
    low: f64,
    high: f64,
) -> StoreResult<Vec<Snapshot>> {
    let payloads = store.list(SNAPSHOT_QUEUE).await?;
    let scanned = payloads.len();

    let mut out: Vec<Snapshot> = payloads
        .iter()
        .enumerate()
        .filter_map(|(i, bytes)| match codec::decode::<Snapshot>(bytes) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(position = i, "skipping undecodable snapshot: {}", e);
                None
            }
        })
        .filter(|s| (low..=high).contains(&s.timestamp_ms()))
        .collect();
    out.sort_by(|a, b| a.timestamp_ms().total_cmp(&b.timestamp_ms()));

    debug!(scanned, matched = out.len(), low, high, "snapshot range query");
    Ok(out)
}

/// Collapses a set of snapshots into one averaged snapshot.
pub fn average_across_snapshots(snapshots: &[Snapshot], opts: &MergeOptions) -> Option<Snapshot> {
    Snapshot::merge_with(snapshots, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::{cluster, node};
    use crate::store::MemoryQueueStore;

    fn snapshot(ts: f64) -> Snapshot {
        Snapshot::new(ts, cluster(ts), vec![node("node-0", ts)])
    }

    async fn store_with(timestamps: &[f64]) -> MemoryQueueStore {
        let store = MemoryQueueStore::new();
        for ts in timestamps {
            store
                .enqueue(SNAPSHOT_QUEUE, codec::encode(&snapshot(*ts)).unwrap())
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_range_is_inclusive_and_ordered() {
        let store = store_with(&[100.0, 200.0, 300.0, 400.0, 500.0]).await;
        let found = get_snapshots_in_range(&store, 150.0, 450.0).await.unwrap();
        let ts: Vec<f64> = found.iter().map(|s| s.timestamp_ms()).collect();
        assert_eq!(ts, vec![200.0, 300.0, 400.0]);

        let edges = get_snapshots_in_range(&store, 200.0, 400.0).await.unwrap();
        assert_eq!(edges.len(), 3);

        // scanning does not consume
        assert_eq!(store.len(SNAPSHOT_QUEUE).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_range_skips_corrupt_payloads() {
        let store = store_with(&[100.0]).await;
        store.enqueue(SNAPSHOT_QUEUE, b"{oops".to_vec()).await.unwrap();
        store
            .enqueue(SNAPSHOT_QUEUE, codec::encode(&snapshot(300.0)).unwrap())
            .await
            .unwrap();

        let found = get_snapshots_in_range(&store, 0.0, 1000.0).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_range() {
        let store = store_with(&[]).await;
        assert!(get_snapshots_in_range(&store, 0.0, 1e12).await.unwrap().is_empty());

        let store = store_with(&[100.0]).await;
        assert!(get_snapshots_in_range(&store, 200.0, 100.0).await.unwrap().is_empty());
    }

    #[test]
    fn test_average_across_snapshots() {
        let avg =
            average_across_snapshots(&[snapshot(100.0), snapshot(300.0)], &MergeOptions::default())
                .unwrap();
        assert_eq!(avg.timestamp_ms(), 200.0);
        assert_eq!(avg.nodes().len(), 1);
        assert!(average_across_snapshots(&[], &MergeOptions::default()).is_none());
    }
}
