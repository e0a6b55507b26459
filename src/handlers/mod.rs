//! HTTP endpoint handlers for the aggregator.
//!
//! - `/queues/{name}`: enqueue and list raw records
//! - `/snapshots`: range query and deletion
//! - `/snapshots/average`: averaged range rollup
//! - `/metrics`: Prometheus metrics endpoint
//! - `/health`: health check endpoint
//! - `/doc`: documentation endpoint

pub mod data;
pub mod doc;
pub mod health;
pub mod metrics;
pub mod snapshots;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::client::ClientError;
use crate::store::StoreError;

pub use data::{get_data_handler, put_data_handler};
pub use doc::doc_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use snapshots::{average_snapshots_handler, delete_snapshots_handler, get_snapshots_handler};

/// Error returned by the queue and snapshot handlers.
#[derive(Debug)]
pub struct ApiError(pub ClientError);

impl From<ClientError> for ApiError {
    fn from(e: ClientError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ClientError::InvalidQueue(_) | ClientError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ClientError::Store(StoreError::QueueUnavailable { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Rejected request: {}", self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use prometheus::Registry;

    use crate::config::Config;
    use crate::health_stats::HealthStats;
    use crate::metrics::AggregatorMetrics;
    use crate::service::SnapshotService;
    use crate::state::{AppState, SharedState};
    use crate::store::MemoryQueueStore;

    pub fn state() -> SharedState {
        let registry = Registry::new();
        let metrics = AggregatorMetrics::new(&registry).unwrap();
        Arc::new(AppState {
            registry,
            metrics,
            service: SnapshotService::new(Arc::new(MemoryQueueStore::new())),
            config: Arc::new(Config::default()),
            health_stats: Arc::new(HealthStats::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ApiError(ClientError::InvalidQueue(String::new())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(ClientError::Store(StoreError::QueueUnavailable {
                queue: "q".into(),
                reason: "loading".into(),
            }))
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(ClientError::Store(StoreError::Cancelled)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
