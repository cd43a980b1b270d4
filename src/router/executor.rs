//! Task execution: model selection, reservation, dispatch and fallback
//!
//! One task walks its tier's candidates in rank order. A rate-limited model
//! is put into cooldown; any failed model is excluded for the rest of the
//! task. When a tier has no usable candidate left the task escalates one
//! tier up (if allowed) or fails with `AllFallbacksExhausted`. A budget
//! denial is terminal and never escalated.

use super::dispatch::{DispatchCall, spawn_dispatch};
use super::{Request, RouteState, RoutingDecision, Task, TaskOutcome};
use crate::budget::{BudgetLedger, CostEstimator};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::models::{ExclusionSet, ModelCatalog, ModelDescriptor, ModelId, Tier};
use crate::provider::{Provider, ProviderError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared execution machinery for planning calls and tasks
pub struct Executor {
    config: Arc<Config>,
    catalog: Arc<ModelCatalog>,
    ledger: Arc<BudgetLedger>,
    provider: Arc<dyn Provider>,
    estimator: CostEstimator,
    metrics: Arc<Metrics>,
}

impl Executor {
    pub fn new(
        config: Arc<Config>,
        catalog: Arc<ModelCatalog>,
        ledger: Arc<BudgetLedger>,
        provider: Arc<dyn Provider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let estimator = CostEstimator::new(config.budget.max_output_tokens());
        Self {
            config,
            catalog,
            ledger,
            provider,
            estimator,
            metrics,
        }
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn estimator(&self) -> &CostEstimator {
        &self.estimator
    }

    /// First available candidate of `tier` not in `exclude`
    ///
    /// The fallback chain holds the remaining candidates in rank order.
    /// Returns `None` when the tier has nothing usable; never escalates.
    pub fn select_model(
        &self,
        tier: Tier,
        prompt: &str,
        exclude: &ExclusionSet,
    ) -> Option<RoutingDecision> {
        let mut candidates = self
            .catalog
            .candidates(tier)
            .into_iter()
            .filter(|m| !exclude.contains(m.id()));
        let selected = candidates.next()?;
        let estimated_cost = self.estimator.estimate(prompt, &selected);
        Some(RoutingDecision {
            selected_model: selected,
            estimated_cost,
            fallback_chain: candidates.collect(),
            tier,
        })
    }

    /// Model and estimate used for the pre-flight budget check
    ///
    /// Prefers the first available candidate of `tier`, then its top-ranked
    /// model even if cooling, then the escalation tiers when allowed.
    pub fn estimate_for(&self, tier: Tier, prompt: &str) -> Option<(ModelDescriptor, f64)> {
        let mut current = Some(tier);
        while let Some(t) = current {
            let model = self
                .catalog
                .candidates(t)
                .into_iter()
                .next()
                .or_else(|| self.catalog.top_ranked(t));
            if let Some(model) = model {
                let estimate = self.estimator.estimate(prompt, &model);
                return Some((model, estimate));
            }
            current = if self.config.routing.allow_escalation {
                t.escalate()
            } else {
                None
            };
        }
        None
    }

    /// Run one task to completion, walking the fallback chain
    ///
    /// # Errors
    /// - [`AppError::BudgetExceeded`] if a reservation is denied
    /// - [`AppError::AllFallbacksExhausted`] if no candidate succeeded
    /// - [`AppError::Cancelled`] if `cancel` fires before a result arrives;
    ///   an in-flight call still settles its cost
    ///
    /// Partial-result lists on returned errors are empty; callers attach them.
    pub async fn execute(
        &self,
        request: &Request,
        task: &mut Task,
        requested: Tier,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> AppResult<TaskOutcome> {
        let mut tier = requested;
        let mut excluded = ExclusionSet::new();
        let mut attempted: Vec<ModelId> = Vec::new();
        let mut last_error: Option<ProviderError> = None;

        loop {
            if cancel.is_cancelled() {
                task.fail();
                return Err(AppError::Cancelled { completed: vec![] });
            }

            let Some(decision) = self.select_model(tier, prompt, &excluded) else {
                if self.config.routing.allow_escalation
                    && let Some(next) = tier.escalate()
                {
                    tracing::warn!(
                        request_id = %request.id(),
                        task_id = %task.id(),
                        from_tier = %tier,
                        to_tier = %next,
                        attempted = attempted.len(),
                        "No usable model in tier, escalating"
                    );
                    self.observe(
                        self.metrics.record_escalation(tier, next),
                        "record_escalation",
                    );
                    tier = next;
                    continue;
                }

                task.fail();
                tracing::error!(
                    request_id = %request.id(),
                    task_id = %task.id(),
                    tier = %requested,
                    state = RouteState::Failed.as_str(),
                    attempted = ?attempted,
                    last_error = ?last_error,
                    "All fallbacks exhausted"
                );
                return Err(AppError::AllFallbacksExhausted {
                    tier: requested,
                    attempted,
                    last_error,
                    completed: vec![],
                });
            };

            let model = decision.selected_model;
            tracing::debug!(
                request_id = %request.id(),
                task_id = %task.id(),
                state = RouteState::ModelSelected.as_str(),
                model_id = %model.id(),
                tier = %tier,
                estimated_cost = decision.estimated_cost,
                fallbacks = decision.fallback_chain.len(),
                "Model selected"
            );

            let reservation = match self
                .ledger
                .reserve(request.session_id(), task.id(), decision.estimated_cost)
                .await
            {
                Ok(reservation) => reservation,
                Err(denied) => {
                    task.fail();
                    self.observe(self.metrics.record_budget_denial(), "record_budget_denial");
                    return Err(AppError::BudgetExceeded {
                        remaining: denied.remaining,
                        required: denied.required,
                        completed: vec![],
                    });
                }
            };

            task.start(model.id());
            attempted.push(model.id().clone());
            tracing::debug!(
                request_id = %request.id(),
                task_id = %task.id(),
                state = RouteState::Executing.as_str(),
                model_id = %model.id(),
                attempt = task.attempt(),
                "Dispatching provider call"
            );

            let timeout = Duration::from_secs(self.config.timeout_for_tier(tier));
            let mut handle = spawn_dispatch(
                self.provider.clone(),
                self.ledger.clone(),
                reservation,
                DispatchCall {
                    model: model.clone(),
                    prompt: prompt.to_string(),
                    max_tokens: self.estimator.max_output_tokens(),
                    timeout,
                },
            );

            let joined = tokio::select! {
                joined = &mut handle => joined,
                _ = cancel.cancelled() => {
                    task.fail();
                    tracing::info!(
                        request_id = %request.id(),
                        task_id = %task.id(),
                        model_id = %model.id(),
                        "Cancelled while executing; call will still settle its cost"
                    );
                    return Err(AppError::Cancelled { completed: vec![] });
                }
            };

            let result = joined.map_err(|e| {
                task.fail();
                AppError::Internal(format!("provider dispatch task failed: {}", e))
            })?;

            match result {
                Ok(dispatched) => {
                    task.succeed();
                    self.catalog.tracker().mark_success(model.id());
                    self.observe(
                        self.metrics.record_provider_call(tier, "success"),
                        "record_provider_call",
                    );
                    self.observe(
                        self.metrics.record_provider_latency(
                            tier,
                            dispatched.elapsed.as_secs_f64() * 1000.0,
                        ),
                        "record_provider_latency",
                    );
                    self.metrics
                        .record_spend(dispatched.transaction.cost_micros);

                    let escalated_from = (tier != requested).then_some(requested);
                    tracing::info!(
                        request_id = %request.id(),
                        task_id = %task.id(),
                        state = RouteState::Succeeded.as_str(),
                        model_id = %model.id(),
                        tier = %tier,
                        cost = dispatched.transaction.cost,
                        attempts = task.attempt(),
                        elapsed_ms = dispatched.elapsed.as_millis() as u64,
                        "Task succeeded"
                    );

                    return Ok(TaskOutcome {
                        task_id: task.id().clone(),
                        description: task.description().to_string(),
                        model_id: model.id().clone(),
                        tier,
                        text: dispatched.completion.text,
                        cost: dispatched.transaction.cost,
                        cost_micros: dispatched.transaction.cost_micros,
                        attempts: task.attempt(),
                        escalated_from,
                    });
                }
                Err(error) => {
                    self.observe(
                        self.metrics.record_provider_call(tier, error.kind()),
                        "record_provider_call",
                    );
                    if error.is_rate_limit() {
                        self.catalog.tracker().mark_throttled(model.id());
                        self.observe(
                            self.metrics.record_throttle(model.id()),
                            "record_throttle",
                        );
                    }
                    self.observe(self.metrics.record_fallback(tier), "record_fallback");
                    tracing::warn!(
                        request_id = %request.id(),
                        task_id = %task.id(),
                        state = RouteState::Fallback.as_str(),
                        model_id = %model.id(),
                        error = %error,
                        "Provider call failed, trying next candidate"
                    );
                    excluded.insert(model.id().clone());
                    last_error = Some(error);
                }
            }
        }
    }

    fn observe(&self, result: Result<(), prometheus::Error>, operation: &str) {
        if let Err(e) = result {
            tracing::warn!(error = %e, operation = operation, "Failed to record metric");
            self.metrics.metrics_recording_failure(operation);
        }
    }
}
