//! Per-model rate-limit cooldowns
//!
//! A model that answers with a rate-limit error is put into a cooldown window
//! and excluded from candidate lists until the window passes. Consecutive
//! throttles double the window, starting at `min_cooldown` and capped at
//! `max_cooldown`. A successful call resets the strike counter.

use super::ModelId;
use crate::config::CooldownConfig;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Cooldown state for a single model
///
/// All fields are private; state only changes through [`RateLimitTracker`].
#[derive(Clone, Debug, Serialize)]
pub struct CooldownState {
    model_id: ModelId,
    strikes: u32,
    cooldown_until: Option<DateTime<Utc>>,
    last_throttled: Option<DateTime<Utc>>,
}

impl CooldownState {
    fn new(model_id: ModelId) -> Self {
        Self {
            model_id,
            strikes: 0,
            cooldown_until: None,
            last_throttled: None,
        }
    }

    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    /// Consecutive throttles since the last successful call
    pub fn strikes(&self) -> u32 {
        self.strikes
    }

    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.cooldown_until
    }

    pub fn last_throttled(&self) -> Option<DateTime<Utc>> {
        self.last_throttled
    }

    fn is_cooling_at(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

/// Tracks cooldown windows for every model that has ever been throttled
///
/// Models with no entry are available. State lives in a sharded concurrent
/// map so lookups on the routing path never contend on a global lock.
pub struct RateLimitTracker {
    states: DashMap<ModelId, CooldownState>,
    min_cooldown_secs: u64,
    max_cooldown_secs: u64,
}

impl RateLimitTracker {
    /// Create a tracker with the given cooldown bounds
    ///
    /// `max_cooldown_secs` below `min_cooldown_secs` is raised to the minimum.
    pub fn new(min_cooldown_secs: u64, max_cooldown_secs: u64) -> Self {
        Self {
            states: DashMap::new(),
            min_cooldown_secs,
            max_cooldown_secs: max_cooldown_secs.max(min_cooldown_secs),
        }
    }

    /// Create a tracker from the `[cooldown]` config section
    pub fn from_config(config: &CooldownConfig) -> Self {
        Self::new(config.min_seconds(), config.max_seconds())
    }

    /// Window length for the given strike number (1-indexed)
    ///
    /// The formula is `min * 2^(strike-1)`, capped at the max cooldown.
    pub fn backoff_secs(&self, strike: u32) -> u64 {
        let exponent = strike.saturating_sub(1);
        self.min_cooldown_secs
            .saturating_mul(2_u64.saturating_pow(exponent))
            .min(self.max_cooldown_secs)
    }

    /// Record a rate-limit response and start (or extend) the cooldown
    ///
    /// Returns the new `cooldown_until`.
    pub fn mark_throttled(&self, model_id: &ModelId) -> DateTime<Utc> {
        self.mark_throttled_at(model_id, Utc::now())
    }

    /// [`mark_throttled`](Self::mark_throttled) with an explicit clock
    pub fn mark_throttled_at(&self, model_id: &ModelId, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut state = self
            .states
            .entry(model_id.clone())
            .or_insert_with(|| CooldownState::new(model_id.clone()));

        state.strikes = state.strikes.saturating_add(1);
        let backoff = self.backoff_secs(state.strikes);
        let seconds = i64::try_from(backoff).unwrap_or(i64::MAX);
        let until = now
            .checked_add_signed(Duration::try_seconds(seconds).unwrap_or(Duration::MAX))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        // Never shorten a window that is already running
        let until = match state.cooldown_until {
            Some(existing) if existing > until => existing,
            _ => until,
        };
        state.cooldown_until = Some(until);
        state.last_throttled = Some(now);

        tracing::warn!(
            model_id = %model_id,
            strikes = state.strikes,
            backoff_secs = backoff,
            cooldown_until = %until,
            "Model rate limited, entering cooldown"
        );

        until
    }

    /// Check whether a model is outside any cooldown window
    pub fn is_available(&self, model_id: &ModelId) -> bool {
        self.is_available_at(model_id, Utc::now())
    }

    /// [`is_available`](Self::is_available) with an explicit clock
    pub fn is_available_at(&self, model_id: &ModelId, now: DateTime<Utc>) -> bool {
        self.states
            .get(model_id)
            .map(|state| !state.is_cooling_at(now))
            .unwrap_or(true)
    }

    /// Record a successful call, resetting the strike counter
    pub fn mark_success(&self, model_id: &ModelId) {
        if let Some(mut state) = self.states.get_mut(model_id)
            && state.strikes > 0
        {
            tracing::info!(
                model_id = %model_id,
                previous_strikes = state.strikes,
                "Model recovered from rate limiting"
            );
            state.strikes = 0;
        }
    }

    /// Current cooldown deadline, if the model was ever throttled
    pub fn cooldown_until(&self, model_id: &ModelId) -> Option<DateTime<Utc>> {
        self.states.get(model_id).and_then(|s| s.cooldown_until)
    }

    /// Snapshot of all tracked models for display/debugging
    pub fn statuses(&self) -> Vec<CooldownState> {
        let mut statuses: Vec<CooldownState> =
            self.states.iter().map(|entry| entry.value().clone()).collect();
        statuses.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        statuses
    }
}
