//! The router state machine
//!
//! [`Router::submit`] classifies a request, estimates it against the
//! top-ranked model of its tier, checks the budget and then either runs a
//! single task (simple and medium) or plans and runs subtasks (complex).
//! Budget and exhaustion failures surface with the remaining budget and any
//! subtasks that already succeeded.

use super::{
    ClassificationResult, Complexity, ComplexityClassifier, Executor, Request, RouteState,
    RoutingDecision, RoutingResult, SessionId, Task, TaskId, TaskOutcome, TaskPlanner,
};
use crate::budget::{BudgetLedger, BudgetStatus, micros_to_usd};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::models::{ExclusionSet, ModelCatalog, ModelId, RefreshReport, Tier};
use crate::provider::Provider;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Budget-constrained multi-tier request router
pub struct Router {
    config: Arc<Config>,
    classifier: ComplexityClassifier,
    executor: Arc<Executor>,
    planner: TaskPlanner,
    metrics: Arc<Metrics>,
}

impl Router {
    pub fn new(
        config: Arc<Config>,
        catalog: Arc<ModelCatalog>,
        ledger: Arc<BudgetLedger>,
        provider: Arc<dyn Provider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let executor = Arc::new(Executor::new(
            config.clone(),
            catalog,
            ledger,
            provider,
            metrics.clone(),
        ));
        let planner = TaskPlanner::new(
            executor.clone(),
            config.planner.planning_tier,
            config.planner.max_subtasks,
        );
        Self {
            config,
            classifier: ComplexityClassifier::new(),
            executor,
            planner,
            metrics,
        }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        self.executor.catalog()
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        self.executor.ledger()
    }

    pub fn classify(&self, request: &Request) -> ClassificationResult {
        self.classifier.classify(request)
    }

    /// Tier a complexity class executes on
    pub fn tier_for(&self, complexity: Complexity) -> Tier {
        match complexity {
            Complexity::Simple => self.config.routing.simple_tier,
            Complexity::Medium => self.config.routing.medium_tier,
            Complexity::Complex => self.config.planner.planning_tier,
        }
    }

    /// First available model of `tier` outside `exclude`, with its fallback chain
    pub fn select_model(
        &self,
        tier: Tier,
        prompt: &str,
        exclude: &ExclusionSet,
    ) -> Option<RoutingDecision> {
        self.executor.select_model(tier, prompt, exclude)
    }

    /// Route a request to completion
    pub async fn submit(&self, request: Request) -> AppResult<RoutingResult> {
        self.submit_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Route a request, aborting early when `cancel` fires
    ///
    /// Tasks that have not started when `cancel` fires are never charged.
    /// A provider call already in flight completes and its cost is recorded.
    ///
    /// # Errors
    /// - [`AppError::BudgetExceeded`] when the estimate exceeds what is left
    /// - [`AppError::PlanningFailed`] when a complex request cannot be planned
    /// - [`AppError::AllFallbacksExhausted`] when no candidate produced a result
    /// - [`AppError::Cancelled`] when `cancel` fired first
    pub async fn submit_with_cancel(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> AppResult<RoutingResult> {
        let classification = self.classifier.classify(&request);
        tracing::debug!(
            request_id = %request.id(),
            session_id = %request.session_id(),
            state = RouteState::Classified.as_str(),
            complexity = classification.complexity.as_str(),
            confidence = classification.confidence,
            "Request classified"
        );

        let result = match classification.complexity {
            Complexity::Simple | Complexity::Medium => {
                self.route_single(&request, classification.complexity, &cancel)
                    .await
            }
            Complexity::Complex => self.route_complex(&request, &cancel).await,
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        if let Err(e) = self
            .metrics
            .record_request(classification.complexity, outcome)
        {
            tracing::warn!(error = %e, "Failed to record request metric");
            self.metrics.metrics_recording_failure("record_request");
        }

        match &result {
            Ok(done) => tracing::info!(
                request_id = %request.id(),
                complexity = done.complexity.as_str(),
                cost = done.cost_incurred,
                tasks = done.tasks.len(),
                escalated = done.escalated,
                budget_remaining = done.budget_remaining,
                "Request completed"
            ),
            Err(e) => tracing::warn!(
                request_id = %request.id(),
                kind = e.kind(),
                completed = e.completed().len(),
                error = %e,
                "Request failed"
            ),
        }

        result
    }

    /// Budget status for a session
    ///
    /// Read-only: calling it any number of times never changes spend.
    pub async fn status(&self, session: &SessionId) -> BudgetStatus {
        self.ledger().session_status(session).await
    }

    /// Refresh the model catalog now; concurrent calls coalesce
    pub async fn refresh_now(&self) -> AppResult<RefreshReport> {
        Ok(self.catalog().refresh_now().await?)
    }

    async fn route_single(
        &self,
        request: &Request,
        complexity: Complexity,
        cancel: &CancellationToken,
    ) -> AppResult<RoutingResult> {
        let tier = self.tier_for(complexity);
        let mut task = Task::new(TaskId::single(request.id()), request.id(), "request");
        let outcome = self
            .run_task(request, &mut task, tier, request.prompt(), cancel)
            .await?;
        let text = outcome.text.clone();
        self.finish(request, complexity, text, vec![outcome]).await
    }

    async fn route_complex(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> AppResult<RoutingResult> {
        let plan = self.planner.decompose(request, cancel).await?;
        let total = plan.tasks.len();
        let subtask_tier = self.config.routing.simple_tier;
        let concurrency = self.config.planner.subtask_concurrency.max(1);

        // Set on the first failure: queued subtasks are skipped, running ones
        // finish so their charges show up in the partial results
        let halted = AtomicBool::new(false);
        let halted = &halted;

        let runs = futures::stream::iter(plan.tasks.into_iter().enumerate().map(
            |(i, mut task)| async move {
                if halted.load(Ordering::Acquire) {
                    return None;
                }
                let prompt = TaskPlanner::build_subtask_prompt(
                    request.prompt(),
                    i + 1,
                    total,
                    task.description(),
                );
                Some(
                    self.run_task(request, &mut task, subtask_tier, &prompt, cancel)
                        .await,
                )
            },
        ))
        .buffered(concurrency);
        let mut runs = std::pin::pin!(runs);

        let mut completed: Vec<TaskOutcome> = Vec::with_capacity(total);
        let mut failure: Option<AppError> = None;
        while let Some(result) = runs.next().await {
            match result {
                Some(Ok(outcome)) => completed.push(outcome),
                Some(Err(e)) if failure.is_none() => {
                    tracing::warn!(
                        request_id = %request.id(),
                        completed = completed.len(),
                        error = %e,
                        "Subtask failed, abandoning subtasks not yet started"
                    );
                    halted.store(true, Ordering::Release);
                    failure = Some(e);
                }
                Some(Err(e)) => tracing::debug!(
                    request_id = %request.id(),
                    error = %e,
                    "Another subtask failed after the first failure"
                ),
                None => {}
            }
        }
        if let Some(e) = failure {
            return Err(e.with_completed(completed));
        }

        let text = completed
            .iter()
            .map(|o| o.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut tasks = Vec::with_capacity(completed.len() + 1);
        tasks.push(plan.planning);
        tasks.extend(completed);
        self.finish(request, Complexity::Complex, text, tasks).await
    }

    /// Estimate, budget-check and execute one task
    async fn run_task(
        &self,
        request: &Request,
        task: &mut Task,
        tier: Tier,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> AppResult<TaskOutcome> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled { completed: vec![] });
        }

        let Some((model, estimate)) = self.executor.estimate_for(tier, prompt) else {
            tracing::error!(
                request_id = %request.id(),
                task_id = %task.id(),
                tier = %tier,
                state = RouteState::Failed.as_str(),
                "No model available for tier"
            );
            return Err(AppError::AllFallbacksExhausted {
                tier,
                attempted: vec![],
                last_error: None,
                completed: vec![],
            });
        };
        tracing::debug!(
            request_id = %request.id(),
            task_id = %task.id(),
            state = RouteState::Estimated.as_str(),
            model_id = %model.id(),
            estimated_cost = estimate,
            "Task estimated"
        );

        let check = self.ledger().check(request.session_id(), estimate).await;
        if !check.allowed {
            if let Err(e) = self.metrics.record_budget_denial() {
                tracing::warn!(error = %e, "Failed to record budget denial metric");
                self.metrics.metrics_recording_failure("record_budget_denial");
            }
            tracing::warn!(
                request_id = %request.id(),
                task_id = %task.id(),
                state = RouteState::Failed.as_str(),
                required = check.required,
                remaining = check.remaining,
                "Budget exceeded, not executing"
            );
            return Err(AppError::BudgetExceeded {
                remaining: check.remaining,
                required: check.required,
                completed: vec![],
            });
        }
        tracing::debug!(
            request_id = %request.id(),
            task_id = %task.id(),
            state = RouteState::BudgetChecked.as_str(),
            remaining = check.remaining,
            "Task within budget"
        );

        self.executor
            .execute(request, task, tier, prompt, cancel)
            .await
    }

    async fn finish(
        &self,
        request: &Request,
        complexity: Complexity,
        text: String,
        tasks: Vec<TaskOutcome>,
    ) -> AppResult<RoutingResult> {
        let cost_micros: u64 = tasks.iter().map(|t| t.cost_micros).sum();
        let mut models_used: Vec<ModelId> = Vec::new();
        for task in &tasks {
            if !models_used.contains(&task.model_id) {
                models_used.push(task.model_id.clone());
            }
        }
        let escalated = tasks.iter().any(|t| t.escalated_from.is_some());
        let budget_remaining = self.status(request.session_id()).await.remaining;

        Ok(RoutingResult {
            request_id: request.id(),
            complexity,
            text,
            cost_incurred: micros_to_usd(cost_micros),
            models_used,
            budget_remaining,
            escalated,
            tasks,
        })
    }
}
