//! Request routing for tierroute
//!
//! Classification → estimation → budget check → (planning) → model selection
//! → execution → fallback → recording. [`Router`] drives the state machine;
//! the types in this module are what flows through it.

pub mod classifier;
pub mod dispatch;
pub mod engine;
pub mod executor;
pub mod planner;

pub use classifier::ComplexityClassifier;
pub use engine::Router;
pub use executor::Executor;
pub use planner::{Plan, TaskPlanner};

use crate::models::{ModelDescriptor, ModelId, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Caller-supplied session context; spend is attributed per session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Session used when the caller does not supply one
    pub fn anonymous() -> Self {
        Self("anonymous".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of one provider-facing unit of work: `{request}/{slot}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// The single implicit task of a simple or medium request
    pub fn single(request_id: Uuid) -> Self {
        Self(format!("{}/main", request_id))
    }

    /// The planning call of a complex request
    pub fn planning(request_id: Uuid) -> Self {
        Self(format!("{}/plan", request_id))
    }

    /// Subtask `index` (1-based, plan order) of a complex request
    pub fn subtask(request_id: Uuid, index: usize) -> Self {
        Self(format!("{}/{}", request_id, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An incoming request; immutable once created
#[derive(Debug, Clone)]
pub struct Request {
    id: Uuid,
    prompt: String,
    session_id: SessionId,
    submitted_at: DateTime<Utc>,
}

impl Request {
    pub fn new(prompt: impl Into<String>, session_id: SessionId) -> Self {
        Self::with_id(Uuid::new_v4(), prompt, session_id)
    }

    /// Create a request under an existing id (e.g. the HTTP request id)
    pub fn with_id(id: Uuid, prompt: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            session_id,
            submitted_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

/// Cost/complexity class of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

/// Classifier output; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub complexity: Complexity,
    /// In [0, 1]
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One provider-facing unit of work
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    id: TaskId,
    parent_request_id: Uuid,
    description: String,
    assigned_model: Option<ModelId>,
    status: TaskStatus,
    attempt: u32,
}

impl Task {
    pub fn new(id: TaskId, parent_request_id: Uuid, description: impl Into<String>) -> Self {
        Self {
            id,
            parent_request_id,
            description: description.into(),
            assigned_model: None,
            status: TaskStatus::Pending,
            attempt: 0,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn parent_request_id(&self) -> Uuid {
        self.parent_request_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn assigned_model(&self) -> Option<&ModelId> {
        self.assigned_model.as_ref()
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Number of models tried so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn start(&mut self, model: &ModelId) {
        self.assigned_model = Some(model.clone());
        self.status = TaskStatus::Running;
        self.attempt += 1;
    }

    pub(crate) fn succeed(&mut self) {
        self.status = TaskStatus::Succeeded;
    }

    pub(crate) fn fail(&mut self) {
        self.status = TaskStatus::Failed;
    }
}

/// Model choice for one task attempt
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub selected_model: ModelDescriptor,
    pub estimated_cost: f64,
    /// Remaining candidates in rank order
    pub fallback_chain: Vec<ModelDescriptor>,
    pub tier: Tier,
}

/// States of the routing state machine, used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Classified,
    Estimated,
    BudgetChecked,
    Planned,
    ModelSelected,
    Executing,
    Succeeded,
    Fallback,
    Failed,
}

impl RouteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteState::Classified => "classified",
            RouteState::Estimated => "estimated",
            RouteState::BudgetChecked => "budget_checked",
            RouteState::Planned => "planned",
            RouteState::ModelSelected => "model_selected",
            RouteState::Executing => "executing",
            RouteState::Succeeded => "succeeded",
            RouteState::Fallback => "fallback",
            RouteState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RouteState::Succeeded | RouteState::Failed)
    }
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task that finished successfully (and was paid for)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub description: String,
    pub model_id: ModelId,
    pub tier: Tier,
    pub text: String,
    pub cost: f64,
    pub cost_micros: u64,
    pub attempts: u32,
    /// Set when the task ran above the tier it asked for
    pub escalated_from: Option<Tier>,
}

/// What `submit` returns on success
#[derive(Debug, Clone, Serialize)]
pub struct RoutingResult {
    pub request_id: Uuid,
    pub complexity: Complexity,
    pub text: String,
    pub cost_incurred: f64,
    pub models_used: Vec<ModelId>,
    pub budget_remaining: f64,
    pub escalated: bool,
    /// Planning call first (complex requests), then each executed task
    pub tasks: Vec<TaskOutcome>,
}
