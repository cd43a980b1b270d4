//! Error types for tierroute
//!
//! All errors implement `IntoResponse` for Axum handlers. Terminal routing
//! errors carry the state a caller needs to recover: remaining budget and
//! the subtasks that already succeeded (and were paid for).

use crate::models::{DiscoveryError, ModelId, Tier};
use crate::provider::ProviderError;
use crate::router::TaskOutcome;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Budget exceeded: {required:.6} USD required, {remaining:.6} USD remaining")]
    BudgetExceeded {
        remaining: f64,
        required: f64,
        completed: Vec<TaskOutcome>,
    },

    #[error("Planning failed: {reason}")]
    PlanningFailed { reason: String, remaining: f64 },

    #[error(
        "All fallbacks exhausted for {tier} tier after {} attempt(s)",
        .attempted.len()
    )]
    AllFallbacksExhausted {
        tier: Tier,
        attempted: Vec<ModelId>,
        last_error: Option<ProviderError>,
        completed: Vec<TaskOutcome>,
    },

    #[error("Request cancelled after {} completed subtask(s)", .completed.len())]
    Cancelled { completed: Vec<TaskOutcome> },

    #[error("Catalog refresh failed: {0}")]
    CatalogRefresh(#[from] DiscoveryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Subtasks that succeeded before the request failed
    pub fn completed(&self) -> &[TaskOutcome] {
        match self {
            Self::BudgetExceeded { completed, .. }
            | Self::AllFallbacksExhausted { completed, .. }
            | Self::Cancelled { completed } => completed,
            _ => &[],
        }
    }

    /// Attach partial results to a terminal routing error
    pub(crate) fn with_completed(self, done: Vec<TaskOutcome>) -> Self {
        match self {
            Self::BudgetExceeded {
                remaining,
                required,
                ..
            } => Self::BudgetExceeded {
                remaining,
                required,
                completed: done,
            },
            Self::AllFallbacksExhausted {
                tier,
                attempted,
                last_error,
                ..
            } => Self::AllFallbacksExhausted {
                tier,
                attempted,
                last_error,
                completed: done,
            },
            Self::Cancelled { .. } => Self::Cancelled { completed: done },
            other => other,
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. } => "config",
            Self::Validation(_) => "validation",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::PlanningFailed { .. } => "planning_failed",
            Self::AllFallbacksExhausted { .. } => "fallbacks_exhausted",
            Self::Cancelled { .. } => "cancelled",
            Self::CatalogRefresh(_) => "catalog_refresh",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::PlanningFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AllFallbacksExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Cancelled { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::CatalogRefresh(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        match &self {
            Self::BudgetExceeded { remaining, .. } | Self::PlanningFailed { remaining, .. } => {
                body["remaining"] = serde_json::json!(remaining);
            }
            Self::AllFallbacksExhausted { attempted, .. } => {
                body["attempted"] = serde_json::json!(attempted);
            }
            _ => {}
        }
        if !self.completed().is_empty() {
            body["completed"] = serde_json::json!(self.completed());
        }

        (status, Json(body)).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
