//! Snapshot range queries and maintenance.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::client::AggregatorClient;
use crate::handlers::ApiError;
use crate::query;
use crate::state::SharedState;

/// Inclusive time range in milliseconds. Missing bounds are open.
#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl RangeParams {
    fn bounds(&self) -> (f64, f64) {
        (self.low.unwrap_or(0.0), self.high.unwrap_or(f64::MAX))
    }
}

/// `GET /snapshots?low=..&high=..`
#[instrument(skip(state))]
pub async fn get_snapshots_handler(
    State(state): State<SharedState>,
    Query(range): Query<RangeParams>,
) -> Result<Response, ApiError> {
    state.health_stats.record_request();
    let (low, high) = range.bounds();
    let snapshots = state.service.get_snapshots(low, high).await?;
    debug!("Returning {} snapshots", snapshots.len());
    Ok(Json(snapshots).into_response())
}

/// `GET /snapshots/average?low=..&high=..`: one snapshot averaged over the range.
#[instrument(skip(state))]
pub async fn average_snapshots_handler(
    State(state): State<SharedState>,
    Query(range): Query<RangeParams>,
) -> Result<Response, ApiError> {
    state.health_stats.record_request();
    let (low, high) = range.bounds();
    let snapshots = state.service.get_snapshots(low, high).await?;
    match query::average_across_snapshots(&snapshots, &state.config.merge_options()) {
        Some(avg) => Ok(Json(avg).into_response()),
        None => Ok((StatusCode::NOT_FOUND, "No snapshots in range").into_response()),
    }
}

/// `DELETE /snapshots`
#[instrument(skip(state))]
pub async fn delete_snapshots_handler(
    State(state): State<SharedState>,
) -> Result<StatusCode, ApiError> {
    state.health_stats.record_request();
    state.service.delete_all_snapshots().await?;
    info!("Snapshots deleted via HTTP");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::handlers::test_support;
    use crate::records::fixtures::{cluster, node};
    use crate::records::Snapshot;
    use crate::store::SNAPSHOT_QUEUE;

    async fn seed(state: &SharedState, stamps: &[f64]) {
        for &ts in stamps {
            let s = Snapshot::new(ts, cluster(ts), vec![node("node-0", ts)]);
            state
                .service
                .put_data(SNAPSHOT_QUEUE, codec::encode(&s).unwrap())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_range_and_average() {
        let state = test_support::state();
        seed(&state, &[100.0, 200.0, 300.0]).await;

        let resp = get_snapshots_handler(
            State(state.clone()),
            Query(RangeParams {
                low: Some(150.0),
                high: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = average_snapshots_handler(
            State(state.clone()),
            Query(RangeParams {
                low: Some(1000.0),
                high: Some(2000.0),
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = average_snapshots_handler(
            State(state.clone()),
            Query(RangeParams {
                low: None,
                high: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_delete() {
        let state = test_support::state();
        seed(&state, &[100.0]).await;
        let status = delete_snapshots_handler(State(state.clone())).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state
            .service
            .get_snapshots(0.0, f64::MAX)
            .await
            .unwrap()
            .is_empty());
    }
}
