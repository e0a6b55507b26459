//! Health check endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str =
    "Project: https://github.com/herakles-io/herakles-cluster-snapshot - More info: https://www.herakles.io";

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");
    state.health_stats.record_request();

    let message = match (state.health_stats.total_drains(), state.health_stats.warnings()) {
        (0, _) => "OK - Waiting for first drain".to_string(),
        (_, 0) => "OK".to_string(),
        (_, w) => format!("OK - {} health warnings", w),
    };

    let table = state.health_stats.render_table();

    debug!("Health check: {}", message);
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\n{table}\n{FOOTER_TEXT}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;

    #[tokio::test]
    async fn test_health_reports_drain_state() {
        let state = test_support::state();
        let resp = health_handler(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        state.health_stats.record_drain(2, 0.01);
        let resp = health_handler(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
