//! Budget status endpoint
//!
//! GET /v1/budget?session=... reports remaining, spent and limit for the
//! current period. Read-only.

use crate::handlers::AppState;
use crate::router::SessionId;
use axum::{
    Json,
    extract::{Query, State},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct BudgetQuery {
    pub session: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BudgetResponse {
    pub session: SessionId,
    pub remaining: f64,
    pub spent: f64,
    pub limit: f64,
    pub reserved: f64,
    pub period: NaiveDate,
}

/// GET /v1/budget handler
pub async fn handler(
    State(state): State<AppState>,
    Query(query): Query<BudgetQuery>,
) -> Json<BudgetResponse> {
    let session = query
        .session
        .filter(|s| !s.trim().is_empty())
        .map(SessionId::from)
        .unwrap_or_else(SessionId::anonymous);
    let status = state.router().status(&session).await;

    Json(BudgetResponse {
        session,
        remaining: status.remaining,
        spent: status.spent,
        limit: status.limit,
        reserved: status.reserved,
        period: status.period,
    })
}
