//! In-process implementation of the aggregator RPC surface.
//!
//! The HTTP handlers delegate to [`SnapshotService`], and tests or
//! single-process deployments can use it directly as an [`AggregatorClient`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::client::{validate_queue_name, AggregatorClient, ClientError};
use crate::query;
use crate::records::Snapshot;
use crate::store::{QueueStore, SNAPSHOT_QUEUE};

#[derive(Clone)]
pub struct SnapshotService {
    store: Arc<dyn QueueStore>,
}

impl SnapshotService {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }
}

#[async_trait]
impl AggregatorClient for SnapshotService {
    async fn put_data(&self, queue: &str, payload: Vec<u8>) -> Result<(), ClientError> {
        validate_queue_name(queue)?;
        debug!(queue, bytes = payload.len(), "enqueue");
        self.store.enqueue(queue, payload).await?;
        Ok(())
    }

    async fn get_data(&self, queue: &str) -> Result<Vec<Vec<u8>>, ClientError> {
        validate_queue_name(queue)?;
        Ok(self.store.list(queue).await?)
    }

    async fn get_snapshots(&self, low: f64, high: f64) -> Result<Vec<Snapshot>, ClientError> {
        Ok(query::get_snapshots_in_range(self.store.as_ref(), low, high).await?)
    }

    async fn delete_all_snapshots(&self) -> Result<(), ClientError> {
        let removed = self.store.len(SNAPSHOT_QUEUE).await?;
        self.store.clear(SNAPSHOT_QUEUE).await?;
        info!(removed, "deleted all snapshots");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::records::fixtures::{cluster, node};
    use crate::store::MemoryQueueStore;

    fn service() -> SnapshotService {
        SnapshotService::new(Arc::new(MemoryQueueStore::new()))
    }

    #[tokio::test]
    async fn test_put_and_get_data() {
        let svc = service();
        svc.put_data("node-0", b"a".to_vec()).await.unwrap();
        svc.put_data("node-0", b"b".to_vec()).await.unwrap();
        assert_eq!(
            svc.get_data("node-0").await.unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        assert!(matches!(
            svc.put_data(" ", Vec::new()).await,
            Err(ClientError::InvalidQueue(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshots_query_and_delete() {
        let svc = service();
        for ts in [100.0, 200.0] {
            let s = Snapshot::new(ts, cluster(ts), vec![node("node-0", ts)]);
            svc.put_data(SNAPSHOT_QUEUE, codec::encode(&s).unwrap())
                .await
                .unwrap();
        }
        assert_eq!(svc.get_snapshots(0.0, 150.0).await.unwrap().len(), 1);

        svc.delete_all_snapshots().await.unwrap();
        assert!(svc.get_snapshots(0.0, 1000.0).await.unwrap().is_empty());
    }
}
