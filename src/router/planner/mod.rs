//! Plan-then-execute decomposition for complex requests
//!
//! One planning call on the planning tier turns a complex request into an
//! ordered list of small, self-contained steps. The call is estimated and
//! budget-checked before anything is sent: if the budget cannot cover it,
//! decomposition aborts with `PlanningFailed` and nothing is charged.
//!
//! The planner model's output is untrusted text. It is size-capped and
//! screened for refusals before being parsed line by line.

use super::{Executor, Request, RouteState, Task, TaskId, TaskOutcome};
use crate::error::{AppError, AppResult};
use crate::models::Tier;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Maximum accepted planner response (16 KiB)
const MAX_PLAN_RESPONSE: usize = 16 * 1024;

/// Request text beyond this many chars is truncated in the planning prompt
const MAX_PLANNING_REQUEST_CHARS: usize = 4000;

/// Context beyond this many chars is truncated in each subtask prompt
const MAX_SUBTASK_CONTEXT_CHARS: usize = 1500;

/// First-line prefixes that mark a refusal instead of a plan
const REFUSAL_PREFIXES: &[&str] = &[
    "i cannot",
    "i can't",
    "i can not",
    "i'm sorry",
    "i am sorry",
    "sorry",
    "i'm unable",
    "i am unable",
    "unable to",
    "i won't",
    "i will not",
    "as an ai",
];

/// Output of a successful decomposition
#[derive(Debug, Clone)]
pub struct Plan {
    /// Subtasks in execution order, all `Pending`
    pub tasks: Vec<Task>,
    /// The paid planning call
    pub planning: TaskOutcome,
}

/// Decomposes complex requests with one planning call
pub struct TaskPlanner {
    executor: Arc<Executor>,
    planning_tier: Tier,
    max_subtasks: usize,
}

impl TaskPlanner {
    /// Create a planner
    ///
    /// # Arguments
    /// * `executor` - shared execution machinery
    /// * `planning_tier` - tier the planning call runs on
    /// * `max_subtasks` - plans longer than this are truncated
    pub fn new(executor: Arc<Executor>, planning_tier: Tier, max_subtasks: usize) -> Self {
        Self {
            executor,
            planning_tier,
            max_subtasks: max_subtasks.max(1),
        }
    }

    pub fn planning_tier(&self) -> Tier {
        self.planning_tier
    }

    /// Produce an ordered list of subtasks for a complex request
    ///
    /// # Errors
    /// - [`AppError::PlanningFailed`] if no planning model exists, the budget
    ///   cannot cover the planning call, every planning candidate failed, or
    ///   the response held no usable plan (the call's cost stays recorded)
    /// - [`AppError::Cancelled`] if `cancel` fired first
    pub async fn decompose(&self, request: &Request, cancel: &CancellationToken) -> AppResult<Plan> {
        let prompt = Self::build_planning_prompt(request.prompt(), self.max_subtasks);
        let ledger = self.executor.ledger();

        let Some((model, estimate)) = self.executor.estimate_for(self.planning_tier, &prompt)
        else {
            return Err(AppError::PlanningFailed {
                reason: format!("no {} model is configured for planning", self.planning_tier),
                remaining: ledger.session_status(request.session_id()).await.remaining,
            });
        };
        tracing::debug!(
            request_id = %request.id(),
            state = RouteState::Estimated.as_str(),
            model_id = %model.id(),
            estimated_cost = estimate,
            "Planning call estimated"
        );

        let check = ledger.check(request.session_id(), estimate).await;
        if !check.allowed {
            tracing::warn!(
                request_id = %request.id(),
                required = check.required,
                remaining = check.remaining,
                "Budget cannot cover the planning call, no subtasks created"
            );
            return Err(AppError::PlanningFailed {
                reason: format!(
                    "budget cannot cover the planning call ({:.6} USD required, {:.6} USD remaining)",
                    check.required, check.remaining
                ),
                remaining: check.remaining,
            });
        }
        tracing::debug!(
            request_id = %request.id(),
            state = RouteState::BudgetChecked.as_str(),
            remaining = check.remaining,
            "Planning call within budget"
        );

        let mut planning_task =
            Task::new(TaskId::planning(request.id()), request.id(), "plan request");
        let planning = match self
            .executor
            .execute(request, &mut planning_task, self.planning_tier, &prompt, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(AppError::Cancelled { completed }) => return Err(AppError::Cancelled { completed }),
            Err(AppError::BudgetExceeded {
                remaining,
                required,
                ..
            }) => {
                return Err(AppError::PlanningFailed {
                    reason: format!(
                        "budget cannot cover the planning call ({:.6} USD required, {:.6} USD remaining)",
                        required, remaining
                    ),
                    remaining,
                });
            }
            Err(e) => {
                return Err(AppError::PlanningFailed {
                    reason: format!("planning call failed: {}", e),
                    remaining: ledger.session_status(request.session_id()).await.remaining,
                });
            }
        };

        let steps = match Self::parse_plan(&planning.text, self.max_subtasks) {
            Ok(steps) => steps,
            Err(reason) => {
                tracing::error!(
                    request_id = %request.id(),
                    model_id = %planning.model_id,
                    planning_cost = planning.cost,
                    reason = %reason,
                    "Planner returned no usable plan"
                );
                return Err(AppError::PlanningFailed {
                    reason,
                    remaining: ledger.session_status(request.session_id()).await.remaining,
                });
            }
        };

        let tasks: Vec<Task> = steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| Task::new(TaskId::subtask(request.id(), i + 1), request.id(), step))
            .collect();

        tracing::info!(
            request_id = %request.id(),
            state = RouteState::Planned.as_str(),
            subtasks = tasks.len(),
            planning_model = %planning.model_id,
            planning_cost = planning.cost,
            "Request decomposed"
        );

        Ok(Plan { tasks, planning })
    }

    /// Build the planning prompt
    ///
    /// Long requests are truncated on a char boundary so the planner keeps
    /// its instructions in view.
    pub fn build_planning_prompt(user_prompt: &str, max_subtasks: usize) -> String {
        format!(
            "You are a planner. Break the request below into small, self-contained steps \
             that a smaller model can carry out one at a time.\n\n\
             Request:\n{}\n\n\
             Respond with a numbered list of at most {} steps, one per line, in execution order. \
             Each step must make sense on its own. Do not carry out the steps and do not add \
             commentary.",
            truncate_chars(user_prompt, MAX_PLANNING_REQUEST_CHARS),
            max_subtasks
        )
    }

    /// Build the prompt for one subtask
    pub fn build_subtask_prompt(
        original: &str,
        index: usize,
        total: usize,
        description: &str,
    ) -> String {
        format!(
            "You are completing step {} of {} of a larger request.\n\n\
             Overall request, for context:\n{}\n\n\
             Your step:\n{}\n\n\
             Respond with the result of this step only.",
            index,
            total,
            truncate_chars(original, MAX_SUBTASK_CONTEXT_CHARS),
            description
        )
    }

    /// Extract ordered step descriptions from a planner response
    ///
    /// Algorithm:
    /// 1. Reject empty, oversized and refusal responses
    /// 2. If any line carries a list marker (`1.`, `1)`, `-`, `*`, `•`,
    ///    `Step 1:`), keep only marked lines, with markers stripped
    /// 3. Otherwise keep every non-empty line that is not a heading (`...:`)
    /// 4. Cap at `max_subtasks`
    ///
    /// Returns a human-readable reason on failure.
    pub fn parse_plan(response: &str, max_subtasks: usize) -> Result<Vec<String>, String> {
        let trimmed = response.trim();
        if trimmed.is_empty() {
            return Err("planner returned an empty response".to_string());
        }
        if response.len() > MAX_PLAN_RESPONSE {
            return Err(format!(
                "planner response of {} bytes exceeds {} byte limit",
                response.len(),
                MAX_PLAN_RESPONSE
            ));
        }

        let lines: Vec<&str> = trimmed
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("```"))
            .collect();

        if let Some(first) = lines.first() {
            let first = first.to_lowercase();
            if let Some(prefix) = REFUSAL_PREFIXES.iter().find(|p| first.starts_with(*p)) {
                return Err(format!(
                    "planner refused the request (starts with '{}'): '{}'",
                    prefix,
                    truncate_chars(trimmed, 200)
                ));
            }
        }

        let marked: Vec<String> = lines
            .iter()
            .filter_map(|l| strip_marker(l))
            .map(clean_step)
            .filter(|s| !s.is_empty())
            .collect();

        let mut steps = if marked.is_empty() {
            lines
                .iter()
                .filter(|l| !l.ends_with(':'))
                .map(|l| clean_step(l))
                .filter(|s| !s.is_empty())
                .collect()
        } else {
            marked
        };

        if steps.is_empty() {
            return Err(format!(
                "planner response contained no steps: '{}'",
                truncate_chars(trimmed, 200)
            ));
        }

        if steps.len() > max_subtasks {
            tracing::warn!(
                parsed = steps.len(),
                max_subtasks = max_subtasks,
                "Planner returned more steps than allowed, truncating"
            );
            steps.truncate(max_subtasks);
        }

        Ok(steps)
    }
}

/// Strip a list marker; `None` if the line has none
fn strip_marker(line: &str) -> Option<&str> {
    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return Some(rest);
        }
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest);
        }
    }

    let lower = line.to_ascii_lowercase();
    if let Some(after) = lower.strip_prefix("step ") {
        let digits = after.chars().take_while(char::is_ascii_digit).count();
        if digits > 0 && after[digits..].starts_with(':') {
            // "step " (5) + digits + ':' are all ASCII
            return Some(&line[5 + digits + 1..]);
        }
    }

    None
}

/// Trim whitespace and markdown emphasis around a step
fn clean_step(step: &str) -> String {
    step.trim().trim_matches('*').trim().to_string()
}

/// Truncate to `max` chars without splitting a UTF-8 sequence
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_index, _)) => format!("{}... [truncated]", &text[..byte_index]),
        None => text.to_string(),
    }
}
