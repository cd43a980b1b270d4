//! Model descriptors served by the catalog

use super::{ModelId, Tier};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A ranked, tiered model entry
///
/// Immutable once built by the catalog, except for `cooldown_until` which
/// reflects the [`RateLimitTracker`](super::RateLimitTracker) view at the
/// time the descriptor was handed out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    id: ModelId,
    tier: Tier,
    cost_per_token: f64,
    context_window: u32,
    rank: u32,
    cooldown_until: Option<DateTime<Utc>>,
}

impl ModelDescriptor {
    /// Create a descriptor with no cooldown
    ///
    /// Negative or non-finite prices are clamped to zero so that estimates
    /// stay monotonic.
    pub fn new(
        id: impl Into<ModelId>,
        tier: Tier,
        cost_per_token: f64,
        context_window: u32,
        rank: u32,
    ) -> Self {
        let cost_per_token = if cost_per_token.is_finite() && cost_per_token > 0.0 {
            cost_per_token
        } else {
            0.0
        };
        Self {
            id: id.into(),
            tier,
            cost_per_token,
            context_window,
            rank,
            cooldown_until: None,
        }
    }

    pub fn id(&self) -> &ModelId {
        &self.id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Price in USD per token (prompt and completion priced alike)
    pub fn cost_per_token(&self) -> f64 {
        self.cost_per_token
    }

    pub fn context_window(&self) -> u32 {
        self.context_window
    }

    /// Position within the tier, 1 = primary
    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.cooldown_until
    }

    pub(crate) fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    pub(crate) fn with_cooldown(mut self, cooldown_until: Option<DateTime<Utc>>) -> Self {
        self.cooldown_until = cooldown_until;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_prices_clamp_to_zero() {
        let nan = ModelDescriptor::new("a", Tier::Free, f64::NAN, 4096, 1);
        let negative = ModelDescriptor::new("b", Tier::Free, -0.5, 4096, 1);
        assert_eq!(nan.cost_per_token(), 0.0);
        assert_eq!(negative.cost_per_token(), 0.0);
    }
}
