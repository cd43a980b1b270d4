//! Pre-flight cost estimation
//!
//! Token counts use the chars/4 heuristic. The estimate assumes the full
//! completion allowance is used, so it is an upper bound on what a call can
//! bill (for providers that honour `max_tokens`).

use super::{micros_to_usd, usd_to_micros_ceil};
use crate::models::ModelDescriptor;

/// Approximate characters per token
pub const CHARS_PER_TOKEN: u64 = 4;

/// Approximate prompt token count: `ceil(chars / 4)`
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(CHARS_PER_TOKEN)
}

/// Deterministic, monotonic cost estimator
#[derive(Debug, Clone, Copy)]
pub struct CostEstimator {
    max_output_tokens: u32,
}

impl CostEstimator {
    /// Create an estimator that budgets `max_output_tokens` of completion per call
    pub fn new(max_output_tokens: u32) -> Self {
        Self { max_output_tokens }
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    /// Estimated tokens billed for one call with this prompt
    pub fn estimated_tokens(&self, prompt: &str) -> u64 {
        estimate_tokens(prompt).saturating_add(u64::from(self.max_output_tokens))
    }

    /// Estimated cost in micro-dollars, rounded up
    pub fn estimate_micros(&self, prompt: &str, model: &ModelDescriptor) -> u64 {
        usd_to_micros_ceil(self.estimated_tokens(prompt) as f64 * model.cost_per_token())
    }

    /// Estimated cost in USD
    pub fn estimate(&self, prompt: &str, model: &ModelDescriptor) -> f64 {
        micros_to_usd(self.estimate_micros(prompt, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;
    use proptest::prelude::*;

    fn model(cost_per_token: f64) -> ModelDescriptor {
        ModelDescriptor::new("m", Tier::Cheap, cost_per_token, 8192, 1)
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // chars, not bytes
        assert_eq!(estimate_tokens("日本語です"), 2);
    }

    #[test]
    fn test_estimate_includes_output_allowance() {
        let estimator = CostEstimator::new(1000);
        // 400 chars = 100 tokens, + 1000 output = 1100 tokens at $0.00001
        let prompt = "x".repeat(400);
        assert_eq!(estimator.estimate_micros(&prompt, &model(0.00001)), 11_000);
        assert_eq!(estimator.estimate(&prompt, &model(0.00001)), 0.011);
    }

    #[test]
    fn test_free_model_estimates_zero() {
        let estimator = CostEstimator::new(4096);
        assert_eq!(estimator.estimate("hello", &model(0.0)), 0.0);
    }

    proptest! {
        #[test]
        fn prop_longer_prompts_never_estimate_lower(
            base in "[a-z ]{0,200}",
            extra in "[a-z ]{0,200}",
            price in 0.0f64..0.001,
            output in 0u32..4096,
        ) {
            let estimator = CostEstimator::new(output);
            let m = model(price);
            let longer = format!("{}{}", base, extra);
            prop_assert!(estimator.estimate_micros(&longer, &m) >= estimator.estimate_micros(&base, &m));
        }

        #[test]
        fn prop_estimate_is_deterministic(prompt in ".{0,300}", price in 0.0f64..0.001) {
            let estimator = CostEstimator::new(512);
            let m = model(price);
            prop_assert_eq!(estimator.estimate(&prompt, &m), estimator.estimate(&prompt, &m));
        }
    }
}
