//! Catalog endpoints
//!
//! GET /v1/catalog lists ranked models per tier with cooldown state.
//! POST /v1/catalog/refresh triggers an immediate refresh.

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::models::{ModelId, RefreshReport, Tier};
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub tiers: BTreeMap<Tier, Vec<CatalogEntry>>,
}

#[derive(Debug, Serialize)]
pub struct CatalogEntry {
    pub id: ModelId,
    pub rank: u32,
    pub cost_per_token: f64,
    pub context_window: u32,
    pub available: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// GET /v1/catalog handler
pub async fn list_handler(State(state): State<AppState>) -> Json<CatalogResponse> {
    let catalog = state.router().catalog();
    let tracker = catalog.tracker();
    let snapshot = catalog.snapshot();

    let tiers = Tier::ALL
        .iter()
        .map(|tier| {
            let entries = snapshot
                .models(*tier)
                .iter()
                .map(|model| CatalogEntry {
                    id: model.id().clone(),
                    rank: model.rank(),
                    cost_per_token: model.cost_per_token(),
                    context_window: model.context_window(),
                    available: tracker.is_available(model.id()),
                    cooldown_until: tracker.cooldown_until(model.id()),
                })
                .collect();
            (*tier, entries)
        })
        .collect();

    Json(CatalogResponse {
        generation: snapshot.generation(),
        refreshed_at: snapshot.refreshed_at(),
        tiers,
    })
}

/// POST /v1/catalog/refresh handler
///
/// Concurrent calls coalesce into one discovery request. On failure the
/// previous catalog stays in place and 502 is returned.
pub async fn refresh_handler(State(state): State<AppState>) -> AppResult<Json<RefreshReport>> {
    let report = state.router().refresh_now().await?;
    tracing::info!(
        generation = report.generation,
        "Catalog refreshed on request"
    );
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_state;

    #[tokio::test]
    async fn test_list_handler_shows_configured_models() {
        let state = test_state();
        let Json(body) = list_handler(State(state)).await;
        assert_eq!(body.generation, 0);
        assert!(body.refreshed_at.is_none());
        assert_eq!(body.tiers[&Tier::Free].len(), 1);
        assert_eq!(body.tiers[&Tier::Premium][0].id.as_str(), "premium/a");
        assert!(body.tiers[&Tier::Free][0].available);
    }

    #[tokio::test]
    async fn test_list_handler_reports_cooldown() {
        let state = test_state();
        let id = ModelId::from("free/a");
        state.router().catalog().tracker().mark_throttled(&id);

        let Json(body) = list_handler(State(state)).await;
        let entry = &body.tiers[&Tier::Free][0];
        assert!(!entry.available);
        assert!(entry.cooldown_until.is_some());
    }

    #[tokio::test]
    async fn test_refresh_without_discovery_fails_soft() {
        let state = test_state();
        let result = refresh_handler(State(state.clone())).await;
        assert!(result.is_err());
        // Previous catalog untouched
        assert_eq!(state.router().catalog().snapshot().len(), 3);
    }
}
