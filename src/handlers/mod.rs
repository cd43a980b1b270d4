//! HTTP request handlers for the tierroute API
//!
//! Thin adapters over [`Router`]: every handler translates JSON in and out
//! and leaves routing, budgeting and catalog decisions to the router.

use crate::budget::BudgetLedger;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::models::{
    HttpDiscovery, ModelCatalog, ModelDiscovery, RateLimitTracker, StaticDiscovery, Tier,
};
use crate::provider::{HttpProvider, Provider};
use crate::router::Router;
use std::sync::Arc;
use std::time::Duration;

pub mod budget;
pub mod catalog;
pub mod health;
pub mod metrics;
pub mod submit;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    router: Arc<Router>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Build the full component graph from configuration
    ///
    /// Uses [`HttpDiscovery`] when `catalog.discovery_url` is set, otherwise
    /// the catalog holds only the configured tier models.
    ///
    /// # Errors
    /// Returns an error if metrics registration or an HTTP client fails.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let metrics = Arc::new(
            Metrics::new()
                .map_err(|e| AppError::Internal(format!("failed to register metrics: {}", e)))?,
        );
        let api_key = config.provider.api_key();
        if api_key.is_none() {
            tracing::warn!(
                env = %config.provider.api_key_env,
                "Provider API key not set, upstream calls will be unauthenticated"
            );
        }

        let discovery: Arc<dyn ModelDiscovery> = match config.catalog.discovery_url() {
            Some(url) => Arc::new(
                HttpDiscovery::new(url, api_key.clone(), config.catalog.discovery_timeout())
                    .map_err(|e| AppError::Internal(format!("discovery client: {}", e)))?,
            ),
            None => Arc::new(StaticDiscovery::default()),
        };

        let longest_timeout = Tier::ALL
            .iter()
            .map(|tier| config.timeout_for_tier(*tier))
            .max()
            .unwrap_or(config.server.request_timeout_seconds);
        let provider: Arc<dyn Provider> = Arc::new(
            HttpProvider::new(
                config.provider.base_url.clone(),
                api_key,
                Duration::from_secs(longest_timeout),
            )
            .map_err(|e| AppError::Internal(format!("provider client: {}", e)))?,
        );

        let tracker = Arc::new(RateLimitTracker::from_config(&config.cooldown));
        let catalog = Arc::new(ModelCatalog::new(
            &config.catalog,
            config.pinned_models(),
            discovery,
            tracker,
            metrics.clone(),
        ));
        let ledger = Arc::new(BudgetLedger::from_config(&config.budget));

        Ok(Self::with_components(config, catalog, ledger, provider, metrics))
    }

    /// Assemble state from pre-built components
    pub fn with_components(
        config: Arc<Config>,
        catalog: Arc<ModelCatalog>,
        ledger: Arc<BudgetLedger>,
        provider: Arc<dyn Provider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let router = Arc::new(Router::new(
            config.clone(),
            catalog,
            ledger,
            provider,
            metrics.clone(),
        ));
        Self {
            config,
            router,
            metrics,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

/// Routes for the API with request-id middleware
pub fn app(state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/v1/submit", post(submit::handler))
        .route("/v1/budget", get(budget::handler))
        .route("/v1/catalog", get(catalog::list_handler))
        .route("/v1/catalog/refresh", post(catalog::refresh_handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    let toml = r#"
[server]
host = "127.0.0.1"
port = 3000

[budget]
daily_limit = 5.0

[[tiers.free]]
id = "free/a"

[[tiers.cheap]]
id = "cheap/a"
cost_per_token = 0.000001

[[tiers.premium]]
id = "premium/a"
cost_per_token = 0.00001
context_window = 200000

[provider]
base_url = "http://127.0.0.1:9/v1"
"#;
    let config: Config = toml.parse().expect("should parse test config");
    AppState::new(Arc::new(config)).expect("should create AppState")
}
