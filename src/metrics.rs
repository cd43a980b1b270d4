//! Prometheus metrics for the router
//!
//! Tracks request outcomes by complexity, provider calls by tier and
//! outcome, throttles, escalations, fallbacks, budget denials, recorded spend
//! and catalog refreshes. Exposed on `/metrics` in Prometheus text format.
//!
//! Every label value comes from a closed enum or from configured/discovered
//! model ids, so cardinality stays bounded.

use crate::models::{ModelId, Tier};
use crate::router::Complexity;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Outcome label for catalog refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success,
    Failure,
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Success => "success",
            RefreshOutcome::Failure => "failure",
        }
    }
}

/// Metrics collector
///
/// Cloning shares the underlying registry and collectors.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    provider_calls_total: IntCounterVec,
    provider_call_duration: HistogramVec,
    throttles_total: IntCounterVec,
    escalations_total: IntCounterVec,
    fallbacks_total: IntCounterVec,
    budget_denials_total: IntCounter,
    spend_micros_total: IntCounter,
    catalog_refreshes_total: IntCounterVec,
    metrics_recording_failures: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance with its own registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 3 complexities × outcome kinds
        let requests_total = IntCounterVec::new(
            Opts::new(
                "tierroute_requests_total",
                "Total routed requests by complexity and outcome",
            ),
            &["complexity", "outcome"],
        )?;

        // Cardinality: 3 tiers × 4 outcomes
        let provider_calls_total = IntCounterVec::new(
            Opts::new(
                "tierroute_provider_calls_total",
                "Total provider calls by tier and outcome (success, rate_limited, unavailable, timeout)",
            ),
            &["tier", "outcome"],
        )?;

        let provider_call_duration = HistogramVec::new(
            HistogramOpts::new(
                "tierroute_provider_call_duration_ms",
                "Latency of successful provider calls in milliseconds",
            )
            .buckets(vec![
                50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0,
            ]),
            &["tier"],
        )?;

        // Cardinality: bounded by catalog size
        let throttles_total = IntCounterVec::new(
            Opts::new(
                "tierroute_throttles_total",
                "Total rate-limit responses by model; each one starts or extends a cooldown",
            ),
            &["model"],
        )?;

        let escalations_total = IntCounterVec::new(
            Opts::new(
                "tierroute_escalations_total",
                "Total tier escalations after a tier ran out of usable models",
            ),
            &["from", "to"],
        )?;

        let fallbacks_total = IntCounterVec::new(
            Opts::new(
                "tierroute_fallbacks_total",
                "Total fallbacks to the next candidate after a failed provider call",
            ),
            &["tier"],
        )?;

        let budget_denials_total = IntCounter::with_opts(Opts::new(
            "tierroute_budget_denials_total",
            "Total reservations denied because the estimate exceeded remaining budget",
        ))?;

        let spend_micros_total = IntCounter::with_opts(Opts::new(
            "tierroute_spend_micros_total",
            "Total recorded spend in micro-dollars (1e-6 USD)",
        ))?;

        let catalog_refreshes_total = IntCounterVec::new(
            Opts::new(
                "tierroute_catalog_refreshes_total",
                "Total catalog refresh attempts by outcome. Failures keep the previous catalog.",
            ),
            &["outcome"],
        )?;

        let metrics_recording_failures = IntCounterVec::new(
            Opts::new(
                "tierroute_metrics_recording_failures_total",
                "Total metrics recording failures by operation. \
                Indicates Prometheus internal errors - frequent failures require investigation.",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(provider_calls_total.clone()))?;
        registry.register(Box::new(provider_call_duration.clone()))?;
        registry.register(Box::new(throttles_total.clone()))?;
        registry.register(Box::new(escalations_total.clone()))?;
        registry.register(Box::new(fallbacks_total.clone()))?;
        registry.register(Box::new(budget_denials_total.clone()))?;
        registry.register(Box::new(spend_micros_total.clone()))?;
        registry.register(Box::new(catalog_refreshes_total.clone()))?;
        registry.register(Box::new(metrics_recording_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            provider_calls_total,
            provider_call_duration,
            throttles_total,
            escalations_total,
            fallbacks_total,
            budget_denials_total,
            spend_micros_total,
            catalog_refreshes_total,
            metrics_recording_failures,
        })
    }

    /// Record a finished request
    ///
    /// `outcome` is `"success"` or an error kind from [`crate::error::AppError::kind`].
    pub fn record_request(
        &self,
        complexity: Complexity,
        outcome: &str,
    ) -> Result<(), prometheus::Error> {
        self.requests_total
            .get_metric_with_label_values(&[complexity.as_str(), outcome])?
            .inc();
        Ok(())
    }

    /// Record one provider call attempt
    pub fn record_provider_call(&self, tier: Tier, outcome: &str) -> Result<(), prometheus::Error> {
        self.provider_calls_total
            .get_metric_with_label_values(&[tier.as_str(), outcome])?
            .inc();
        Ok(())
    }

    /// Record the latency of a successful provider call
    ///
    /// # Errors
    ///
    /// Rejects NaN, infinite and negative values; they corrupt histogram
    /// percentiles.
    pub fn record_provider_latency(
        &self,
        tier: Tier,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite and non-negative, got: {}",
                duration_ms
            )));
        }
        self.provider_call_duration
            .get_metric_with_label_values(&[tier.as_str()])?
            .observe(duration_ms);
        Ok(())
    }

    pub fn record_throttle(&self, model: &ModelId) -> Result<(), prometheus::Error> {
        self.throttles_total
            .get_metric_with_label_values(&[model.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_escalation(&self, from: Tier, to: Tier) -> Result<(), prometheus::Error> {
        self.escalations_total
            .get_metric_with_label_values(&[from.as_str(), to.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_fallback(&self, tier: Tier) -> Result<(), prometheus::Error> {
        self.fallbacks_total
            .get_metric_with_label_values(&[tier.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_budget_denial(&self) -> Result<(), prometheus::Error> {
        self.budget_denials_total.inc();
        Ok(())
    }

    /// Add settled spend, in micro-dollars
    pub fn record_spend(&self, micros: u64) {
        self.spend_micros_total.inc_by(micros);
    }

    pub fn record_catalog_refresh(&self, outcome: RefreshOutcome) -> Result<(), prometheus::Error> {
        self.catalog_refreshes_total
            .get_metric_with_label_values(&[outcome.as_str()])?
            .inc();
        Ok(())
    }

    /// Record a failed metrics operation
    ///
    /// Called when one of the `record_*` methods returns an error. The
    /// failure itself is infallible so it can never cascade.
    pub fn metrics_recording_failure(&self, operation: &str) {
        self.metrics_recording_failures
            .with_label_values(&[operation])
            .inc();
    }

    pub fn budget_denials_count(&self) -> u64 {
        self.budget_denials_total.get()
    }

    pub fn spend_micros_count(&self) -> u64 {
        self.spend_micros_total.get()
    }

    pub fn escalations_count(&self, from: Tier, to: Tier) -> u64 {
        self.escalations_total
            .get_metric_with_label_values(&[from.as_str(), to.as_str()])
            .map(|c| c.get())
            .unwrap_or(0)
    }

    pub fn throttles_count(&self, model: &ModelId) -> u64 {
        self.throttles_total
            .get_metric_with_label_values(&[model.as_str()])
            .map(|c| c.get())
            .unwrap_or(0)
    }

    pub fn catalog_refreshes_count(&self, outcome: RefreshOutcome) -> u64 {
        self.catalog_refreshes_total
            .get_metric_with_label_values(&[outcome.as_str()])
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Sum of recording failures across all operations
    pub fn metrics_recording_failures_count(&self) -> u64 {
        self.registry
            .gather()
            .iter()
            .find(|mf| mf.name() == "tierroute_metrics_recording_failures_total")
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or produces invalid UTF-8.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    metric_family_count = metric_count,
                    "Prometheus text encoder failed"
                );
                prometheus::Error::Msg(format!(
                    "Failed to encode {} metric families: {}",
                    metric_count, e
                ))
            })?;

        String::from_utf8(buffer).map_err(|e| {
            let valid_up_to = e.utf8_error().valid_up_to();
            tracing::error!(
                invalid_byte_index = valid_up_to,
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                valid_up_to, e
            ))
        })
    }
}
