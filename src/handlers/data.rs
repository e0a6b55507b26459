//! Raw record ingestion: collectors push encoded records here.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{debug, instrument};

use crate::client::AggregatorClient;
use crate::handlers::ApiError;
use crate::state::SharedState;

/// `POST /queues/{name}`: appends the request body to the queue.
#[instrument(skip(state, body), fields(bytes = body.len()))]
pub async fn put_data_handler(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.health_stats.record_request();
    state.service.put_data(&name, body.to_vec()).await?;
    debug!("Accepted record for queue {}", name);
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /queues/{name}`: every pending payload, oldest first.
#[instrument(skip(state))]
pub async fn get_data_handler(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Vec<u8>>>, ApiError> {
    state.health_stats.record_request();
    let items = state.service.get_data(&name).await?;
    Ok(Json(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;

    #[tokio::test]
    async fn test_put_then_get() {
        let state = test_support::state();
        let status = put_data_handler(
            State(state.clone()),
            Path("node-0".to_string()),
            Bytes::from_static(b"payload"),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(items) = get_data_handler(State(state.clone()), Path("node-0".to_string()))
            .await
            .unwrap();
        assert_eq!(items, vec![b"payload".to_vec()]);
    }

    #[tokio::test]
    async fn test_blank_queue_name_is_rejected() {
        let state = test_support::state();
        let err = put_data_handler(State(state), Path(" ".to_string()), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.0,
            crate::client::ClientError::InvalidQueue(_)
        ));
    }
}
