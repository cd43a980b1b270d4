//! Model discovery sources
//!
//! The catalog asks a [`ModelDiscovery`] for the current list of models and
//! their pricing. [`HttpDiscovery`] reads an OpenRouter-style `/models`
//! listing; [`StaticDiscovery`] serves a fixed list (configured models, tests).

use super::Tier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on a discovery response body
const MAX_DISCOVERY_RESPONSE: usize = 8 * 1024 * 1024;

/// One model as reported by a discovery source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredModel {
    pub id: String,
    /// USD per prompt token
    pub prompt_price: f64,
    /// USD per completion token
    pub completion_price: f64,
    pub context_window: u32,
    /// Explicit tier assignment, overrides price-based filtering
    pub tier_hint: Option<Tier>,
    /// Listing timestamp (unix seconds), used as a recency signal
    pub created: Option<i64>,
}

impl DiscoveredModel {
    /// Conservative per-token price: the larger of prompt and completion
    pub fn cost_per_token(&self) -> f64 {
        self.prompt_price.max(self.completion_price)
    }
}

/// Discovery failures; all of them leave the current snapshot in place
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery request failed: {0}")]
    Http(String),

    #[error("discovery endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("discovery response could not be decoded: {0}")]
    Decode(String),

    #[error("discovery returned no usable models")]
    Empty,
}

/// Source of model listings for catalog refreshes
#[async_trait]
pub trait ModelDiscovery: Send + Sync {
    async fn list_models(&self) -> Result<Vec<DiscoveredModel>, DiscoveryError>;
}

/// Fixed model list
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    models: Vec<DiscoveredModel>,
}

impl StaticDiscovery {
    pub fn new(models: Vec<DiscoveredModel>) -> Self {
        Self { models }
    }
}

#[async_trait]
impl ModelDiscovery for StaticDiscovery {
    async fn list_models(&self) -> Result<Vec<DiscoveredModel>, DiscoveryError> {
        Ok(self.models.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ModelListing {
    data: Vec<ListedModel>,
}

#[derive(Debug, Deserialize)]
struct ListedModel {
    id: String,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    context_length: Option<u32>,
    #[serde(default)]
    pricing: Option<ListedPricing>,
}

/// Prices arrive as decimal strings (`"0.0000015"`)
#[derive(Debug, Deserialize)]
struct ListedPricing {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    completion: Option<String>,
}

/// Discovery over an OpenRouter-compatible `GET {url}` model listing
pub struct HttpDiscovery {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpDiscovery {
    /// Create a discovery client
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }

    /// Convert a listing entry, skipping entries with unreadable prices
    fn convert(listed: ListedModel) -> Option<DiscoveredModel> {
        let pricing = listed.pricing?;
        let prompt_price = parse_price(pricing.prompt.as_deref())?;
        let completion_price = parse_price(pricing.completion.as_deref())?;
        // Negative prices mark router pseudo-models ("openrouter/auto")
        if prompt_price < 0.0 || completion_price < 0.0 {
            return None;
        }
        let tier_hint = listed.id.ends_with(":free").then_some(Tier::Free);
        Some(DiscoveredModel {
            id: listed.id,
            prompt_price,
            completion_price,
            context_window: listed.context_length.unwrap_or(0),
            tier_hint,
            created: listed.created,
        })
    }
}

/// A missing price is unknown, not free
fn parse_price(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|p| p.is_finite())
}

#[async_trait]
impl ModelDiscovery for HttpDiscovery {
    async fn list_models(&self) -> Result<Vec<DiscoveredModel>, DiscoveryError> {
        let mut request = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DiscoveryError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::Http(e.to_string()))?;
        if body.len() > MAX_DISCOVERY_RESPONSE {
            return Err(DiscoveryError::Decode(format!(
                "response of {} bytes exceeds {} byte limit",
                body.len(),
                MAX_DISCOVERY_RESPONSE
            )));
        }

        let listing: ModelListing =
            serde_json::from_slice(&body).map_err(|e| DiscoveryError::Decode(e.to_string()))?;
        let listed = listing.data.len();
        let models: Vec<DiscoveredModel> =
            listing.data.into_iter().filter_map(Self::convert).collect();

        tracing::debug!(
            url = %self.url,
            listed = listed,
            usable = models.len(),
            "Fetched model listing"
        );

        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(id: &str, prompt: &str, completion: &str) -> ListedModel {
        ListedModel {
            id: id.to_string(),
            created: Some(1_700_000_000),
            context_length: Some(8192),
            pricing: Some(ListedPricing {
                prompt: Some(prompt.to_string()),
                completion: Some(completion.to_string()),
            }),
        }
    }

    #[test]
    fn test_convert_parses_string_prices() {
        let model = HttpDiscovery::convert(listed("a/b", "0.0000015", "0.000002")).unwrap();
        assert_eq!(model.prompt_price, 0.0000015);
        assert_eq!(model.cost_per_token(), 0.000002);
        assert_eq!(model.context_window, 8192);
        assert_eq!(model.tier_hint, None);
    }

    #[test]
    fn test_convert_hints_free_suffix() {
        let model = HttpDiscovery::convert(listed("a/b:free", "0", "0")).unwrap();
        assert_eq!(model.tier_hint, Some(Tier::Free));
    }

    #[test]
    fn test_convert_skips_unreadable_and_negative_prices() {
        assert!(HttpDiscovery::convert(listed("a", "n/a", "0")).is_none());
        assert!(HttpDiscovery::convert(listed("openrouter/auto", "-1", "-1")).is_none());
        let mut no_pricing = listed("c", "0", "0");
        no_pricing.pricing = None;
        assert!(HttpDiscovery::convert(no_pricing).is_none());
    }

    #[test]
    fn test_convert_skips_missing_price_fields() {
        let mut no_completion = listed("d", "0.000001", "0");
        if let Some(pricing) = no_completion.pricing.as_mut() {
            pricing.completion = None;
        }
        assert!(HttpDiscovery::convert(no_completion).is_none());

        let mut no_prompt = listed("e", "0", "0");
        if let Some(pricing) = no_prompt.pricing.as_mut() {
            pricing.prompt = None;
        }
        assert!(HttpDiscovery::convert(no_prompt).is_none());
    }

    #[tokio::test]
    async fn test_static_discovery_returns_its_models() {
        let model = HttpDiscovery::convert(listed("x", "0", "0")).unwrap();
        let discovery = StaticDiscovery::new(vec![model.clone()]);
        assert_eq!(discovery.list_models().await.unwrap(), vec![model]);
    }
}
