//! Completion providers
//!
//! The router only needs one operation from a provider: run a completion
//! against a model and report what it cost. Failures are classified so the
//! router can decide between cooldown-and-fallback (rate limits) and plain
//! fallback (outages, timeouts).

pub mod http;

pub use http::HttpProvider;

use crate::models::ModelDescriptor;
use async_trait::async_trait;

/// A finished completion
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Billed cost in USD
    pub actual_cost: f64,
}

/// Provider-side failure of a single call
///
/// None of these are terminal for a request: each moves the router to the
/// next model in the fallback chain.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("model '{model_id}' is rate limited")]
    RateLimited { model_id: String },

    #[error("model '{model_id}' is unavailable: {reason}")]
    Unavailable { model_id: String, reason: String },

    #[error("model '{model_id}' timed out after {timeout_seconds}s")]
    Timeout {
        model_id: String,
        timeout_seconds: u64,
    },
}

impl ProviderError {
    /// Rate limits put the model into cooldown; other failures do not
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    pub fn model_id(&self) -> &str {
        match self {
            ProviderError::RateLimited { model_id }
            | ProviderError::Unavailable { model_id, .. }
            | ProviderError::Timeout { model_id, .. } => model_id,
        }
    }

    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::Unavailable { .. } => "unavailable",
            ProviderError::Timeout { .. } => "timeout",
        }
    }
}

/// Failure to construct a provider client
#[derive(Debug, thiserror::Error)]
pub enum ProviderSetupError {
    #[error("provider base URL '{url}' must start with http:// or https://")]
    InvalidBaseUrl { url: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Remote completion API
///
/// Implementations must be cheap to share (`Arc<dyn Provider>`); tests use
/// scripted in-memory providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Run one completion
    ///
    /// # Arguments
    /// * `model` - target model; its price is used when the provider does not
    ///   report a cost
    /// * `prompt` - full prompt text
    /// * `max_tokens` - completion allowance
    async fn complete(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<Completion, ProviderError>;
}
