//! Submit endpoint handler
//!
//! Handles POST /v1/submit: routes one request to completion and returns
//! its text, cost and remaining budget.

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::router::{Request, RoutingResult, SessionId};
use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Maximum allowed prompt length in characters (100K chars)
const MAX_PROMPT_LENGTH: usize = 100_000;

/// Maximum allowed session id length
const MAX_SESSION_ID_LENGTH: usize = 128;

/// Submit request from client
///
/// Validation is enforced during deserialization - invalid instances cannot exist.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    prompt: String,
    session_id: Option<String>,
}

impl SubmitRequest {
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Build a router request carrying the HTTP request id
    pub fn into_request(self, request_id: RequestId) -> Request {
        let session = self
            .session_id
            .map(SessionId::from)
            .unwrap_or_else(SessionId::anonymous);
        Request::with_id(request_id.as_uuid(), self.prompt, session)
    }
}

impl<'de> Deserialize<'de> for SubmitRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawSubmitRequest {
            prompt: String,
            #[serde(default)]
            session_id: Option<String>,
        }

        let raw = RawSubmitRequest::deserialize(deserializer)?;

        if raw.prompt.trim().is_empty() {
            return Err(serde::de::Error::custom(
                "prompt cannot be empty or contain only whitespace",
            ));
        }

        let char_count = raw.prompt.chars().count();
        if char_count > MAX_PROMPT_LENGTH {
            return Err(serde::de::Error::custom(format!(
                "prompt exceeds maximum length of {} characters (got {})",
                MAX_PROMPT_LENGTH, char_count
            )));
        }

        if let Some(session) = &raw.session_id {
            if session.trim().is_empty() {
                return Err(serde::de::Error::custom("session_id cannot be empty"));
            }
            if session.chars().count() > MAX_SESSION_ID_LENGTH {
                return Err(serde::de::Error::custom(format!(
                    "session_id exceeds maximum length of {} characters",
                    MAX_SESSION_ID_LENGTH
                )));
            }
            if session.chars().any(char::is_control) {
                return Err(serde::de::Error::custom(
                    "session_id cannot contain control characters",
                ));
            }
        }

        Ok(SubmitRequest {
            prompt: raw.prompt,
            session_id: raw.session_id,
        })
    }
}

/// POST /v1/submit handler
///
/// The request is cancelled once `server.request_timeout_seconds` elapses;
/// the response then carries whatever subtasks already completed.
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<SubmitRequest>,
) -> AppResult<Json<RoutingResult>> {
    let request = body.into_request(request_id);
    tracing::info!(
        request_id = %request_id,
        session_id = %request.session_id(),
        prompt_chars = request.prompt().chars().count(),
        "Received submit request"
    );

    let deadline = Duration::from_secs(state.config().server.request_timeout_seconds);
    let cancel = CancellationToken::new();
    let submit = state.router().submit_with_cancel(request, cancel.clone());
    tokio::pin!(submit);

    let result = tokio::select! {
        result = &mut submit => result,
        _ = tokio::time::sleep(deadline) => {
            tracing::warn!(
                request_id = %request_id,
                timeout_seconds = deadline.as_secs(),
                "Request deadline reached, cancelling"
            );
            cancel.cancel();
            submit.await
        }
    };

    Ok(Json(result?))
}
