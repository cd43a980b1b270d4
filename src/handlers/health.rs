//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Models currently in the catalog
    pub catalog_models: usize,
    /// Catalog generation; 0 until the first successful refresh
    pub catalog_generation: u64,
    /// "operational", or "degraded" once any metric failed to record
    pub metrics_status: &'static str,
}

/// Health check handler
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let snapshot = state.router().catalog().snapshot();
    let metrics_status = if state.metrics().metrics_recording_failures_count() > 0 {
        "degraded"
    } else {
        "operational"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            catalog_models: snapshot.len(),
            catalog_generation: snapshot.generation(),
            metrics_status,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_state;

    #[tokio::test]
    async fn test_health_handler_returns_ok() {
        let state = test_state();
        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "OK");
        assert_eq!(body.catalog_models, 3);
        assert_eq!(body.metrics_status, "operational");
    }

    #[tokio::test]
    async fn test_health_handler_shows_degraded_when_failures_occur() {
        let state = test_state();
        state.metrics().metrics_recording_failure("record_request");

        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.metrics_status, "degraded");
    }
}
