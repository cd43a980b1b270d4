//! Shared fixtures for integration tests
//!
//! `ScriptedProvider` answers per model id with a fixed behavior and records
//! every call it receives, so tests can assert which models were attempted.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tierroute::budget::BudgetLedger;
use tierroute::config::Config;
use tierroute::metrics::Metrics;
use tierroute::models::{
    ModelCatalog, ModelDescriptor, ModelDiscovery, RateLimitTracker, StaticDiscovery,
};
use tierroute::provider::{Completion, Provider, ProviderError};
use tierroute::router::Router;

/// Prompt that classifies as Simple
pub const SIMPLE_PROMPT: &str = "What is the capital of France?";

/// Prompt that classifies as Medium
pub const MEDIUM_PROMPT: &str =
    "Summarize the plot of the novel Dune in a few sentences for a book club newsletter.";

/// Prompt that classifies as Complex
pub const COMPLEX_PROMPT: &str = "Design and implement a comprehensive migration plan for \
    moving our billing service to a new database, step by step.";

#[derive(Debug, Clone)]
pub enum Behavior {
    Reply { text: String, cost: f64 },
    RateLimited,
    Unavailable,
    /// Sleep, then reply
    Slow {
        delay: Duration,
        text: String,
        cost: f64,
    },
    /// Fail with Unavailable when the prompt contains `needle`, else reply
    FailWhen {
        needle: String,
        text: String,
        cost: f64,
    },
}

#[derive(Default)]
pub struct ScriptedProvider {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, model: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(model.to_string(), behavior);
    }

    pub fn reply(&self, model: &str, text: &str, cost: f64) {
        self.set(
            model,
            Behavior::Reply {
                text: text.to_string(),
                cost,
            },
        );
    }

    /// Model ids in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        _max_tokens: u32,
    ) -> Result<Completion, ProviderError> {
        let id = model.id().to_string();
        self.calls.lock().unwrap().push(id.clone());
        let behavior = self.behaviors.lock().unwrap().get(&id).cloned();

        match behavior {
            Some(Behavior::Reply { text, cost }) => Ok(Completion {
                text,
                actual_cost: cost,
            }),
            Some(Behavior::RateLimited) => Err(ProviderError::RateLimited { model_id: id }),
            Some(Behavior::Slow { delay, text, cost }) => {
                tokio::time::sleep(delay).await;
                Ok(Completion {
                    text,
                    actual_cost: cost,
                })
            }
            Some(Behavior::FailWhen { needle, text, cost }) => {
                if prompt.contains(&needle) {
                    Err(ProviderError::Unavailable {
                        model_id: id,
                        reason: "scripted failure".to_string(),
                    })
                } else {
                    Ok(Completion {
                        text,
                        actual_cost: cost,
                    })
                }
            }
            Some(Behavior::Unavailable) | None => Err(ProviderError::Unavailable {
                model_id: id,
                reason: "HTTP 503".to_string(),
            }),
        }
    }
}

/// Config with the given budget line and tier tables appended
pub fn config_with(budget: &str, rest: &str) -> Config {
    let toml = format!(
        r#"
[server]
host = "127.0.0.1"
port = 3000

[budget]
{budget}

{rest}
"#
    );
    toml.parse().expect("test config should be valid")
}

/// Three free models, one cheap, one premium; limit 5.00
pub fn default_config() -> Config {
    config_with(
        "daily_limit = 5.0",
        r#"
[[tiers.free]]
id = "free-a"
rank = 1

[[tiers.free]]
id = "free-b"
rank = 2

[[tiers.free]]
id = "free-c"
rank = 3

[[tiers.cheap]]
id = "cheap-a"
cost_per_token = 0.000001

[[tiers.premium]]
id = "premium-a"
cost_per_token = 0.00001
"#,
    )
}

pub struct Harness {
    pub router: Router,
    pub provider: Arc<ScriptedProvider>,
    pub catalog: Arc<ModelCatalog>,
    pub ledger: Arc<BudgetLedger>,
    pub tracker: Arc<RateLimitTracker>,
    pub metrics: Arc<Metrics>,
}

pub fn harness(config: Config) -> Harness {
    harness_with_discovery(config, Arc::new(StaticDiscovery::default()))
}

pub fn harness_with_discovery(config: Config, discovery: Arc<dyn ModelDiscovery>) -> Harness {
    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new().expect("metrics should register"));
    let tracker = Arc::new(RateLimitTracker::from_config(&config.cooldown));
    let catalog = Arc::new(ModelCatalog::new(
        &config.catalog,
        config.pinned_models(),
        discovery,
        tracker.clone(),
        metrics.clone(),
    ));
    let ledger = Arc::new(BudgetLedger::from_config(&config.budget));
    let provider = ScriptedProvider::new();
    let router = Router::new(
        config,
        catalog.clone(),
        ledger.clone(),
        provider.clone(),
        metrics.clone(),
    );
    Harness {
        router,
        provider,
        catalog,
        ledger,
        tracker,
        metrics,
    }
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// HTTP app state over a scripted provider and configured models only
pub fn app_state(config: Config) -> (tierroute::handlers::AppState, Arc<ScriptedProvider>) {
    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new().expect("metrics should register"));
    let tracker = Arc::new(RateLimitTracker::from_config(&config.cooldown));
    let catalog = Arc::new(ModelCatalog::new(
        &config.catalog,
        config.pinned_models(),
        Arc::new(StaticDiscovery::default()),
        tracker,
        metrics.clone(),
    ));
    let ledger = Arc::new(BudgetLedger::from_config(&config.budget));
    let provider = ScriptedProvider::new();
    let state = tierroute::handlers::AppState::with_components(
        config,
        catalog,
        ledger,
        provider.clone(),
        metrics,
    );
    (state, provider)
}
