//! OpenAI-compatible HTTP provider
//!
//! Speaks `POST {base_url}/chat/completions`. Error mapping:
//! - HTTP 429 → [`ProviderError::RateLimited`]
//! - other non-success statuses, connect and body errors → [`ProviderError::Unavailable`]
//! - client-side timeout → [`ProviderError::Timeout`]
//!
//! Cost comes from `usage.cost` when the provider reports it (OpenRouter does
//! when usage accounting is requested), otherwise from the token counts and
//! the model's catalog price.

use super::{Completion, Provider, ProviderError, ProviderSetupError};
use crate::budget::estimate_tokens;
use crate::models::ModelDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum accepted response body (1 MiB)
const MAX_COMPLETION_RESPONSE: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    usage: UsageOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct UsageOptions {
    include: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    cost: Option<f64>,
}

/// Provider over an OpenAI-compatible chat completions endpoint
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpProvider {
    /// Create a provider
    ///
    /// `timeout` bounds each HTTP exchange; the router applies its own
    /// per-tier deadline on top.
    ///
    /// # Errors
    /// - [`ProviderSetupError::InvalidBaseUrl`] if `base_url` is not http(s)
    /// - [`ProviderSetupError::Client`] if the HTTP client cannot be constructed
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderSetupError> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ProviderSetupError::InvalidBaseUrl { url: base_url });
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn classify_transport_error(&self, model: &ModelDescriptor, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout {
                model_id: model.id().to_string(),
                timeout_seconds: self.timeout.as_secs(),
            }
        } else {
            ProviderError::Unavailable {
                model_id: model.id().to_string(),
                reason: error.to_string(),
            }
        }
    }

    /// Billed cost: reported cost, else tokens × catalog price
    ///
    /// Token counts come from the upstream response and are not trusted to
    /// be sane; the sum saturates instead of overflowing.
    fn cost_of(model: &ModelDescriptor, prompt: &str, text: &str, usage: Option<&Usage>) -> f64 {
        if let Some(cost) = usage.and_then(|u| u.cost).filter(|c| c.is_finite() && *c >= 0.0) {
            return cost;
        }
        let prompt_tokens = usage
            .and_then(|u| u.prompt_tokens)
            .unwrap_or_else(|| estimate_tokens(prompt));
        let completion_tokens = usage
            .and_then(|u| u.completion_tokens)
            .unwrap_or_else(|| estimate_tokens(text));
        let cost = prompt_tokens.saturating_add(completion_tokens) as f64 * model.cost_per_token();
        if cost.is_finite() {
            cost
        } else {
            estimate_tokens(prompt).saturating_add(estimate_tokens(text)) as f64
                * model.cost_per_token()
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn complete(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<Completion, ProviderError> {
        let body = ChatRequest {
            model: model.id().as_str(),
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            usage: UsageOptions { include: true },
        };

        let mut request = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(
            model_id = %model.id(),
            prompt_length = prompt.len(),
            max_tokens = max_tokens,
            "Sending completion request"
        );

        let response = request
            .send()
            .await
            .map_err(|e| self.classify_transport_error(model, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                model_id: model.id().to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Unavailable {
                model_id: model.id().to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.classify_transport_error(model, e))?;
        if bytes.len() > MAX_COMPLETION_RESPONSE {
            return Err(ProviderError::Unavailable {
                model_id: model.id().to_string(),
                reason: format!(
                    "response of {} bytes exceeds {} byte limit",
                    bytes.len(),
                    MAX_COMPLETION_RESPONSE
                ),
            });
        }

        let parsed: ChatResponse =
            serde_json::from_slice(&bytes).map_err(|e| ProviderError::Unavailable {
                model_id: model.id().to_string(),
                reason: format!("malformed response: {}", e),
            })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Unavailable {
                model_id: model.id().to_string(),
                reason: "response contained no completion".to_string(),
            })?;

        let actual_cost = Self::cost_of(model, prompt, &text, parsed.usage.as_ref());

        Ok(Completion { text, actual_cost })
    }
}
