//! Provider dispatch with guaranteed budget settlement
//!
//! Each call runs in its own spawned task that owns the reservation. The
//! task settles the ledger (commit on success, release on failure) whether
//! or not anyone is still waiting for the result, so a cancelled or dropped
//! request can never leave a paid call unrecorded. A provider that panics
//! is treated as unavailable and its hold released.

use crate::budget::{BudgetLedger, Reservation, Transaction};
use crate::models::ModelDescriptor;
use crate::provider::{Completion, Provider, ProviderError};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// One provider call
#[derive(Debug, Clone)]
pub struct DispatchCall {
    pub model: ModelDescriptor,
    pub prompt: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Successful call with its ledger entry
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub completion: Completion,
    pub transaction: Transaction,
    pub elapsed: Duration,
}

/// Spawn a provider call that settles `reservation` when it finishes
///
/// A call that exceeds `timeout` is abandoned and reported as
/// [`ProviderError::Timeout`]; its reservation is released.
pub fn spawn_dispatch(
    provider: Arc<dyn Provider>,
    ledger: Arc<BudgetLedger>,
    reservation: Reservation,
    call: DispatchCall,
) -> JoinHandle<Result<Dispatched, ProviderError>> {
    tokio::spawn(async move {
        let started = Instant::now();
        let completion =
            AssertUnwindSafe(provider.complete(&call.model, &call.prompt, call.max_tokens))
                .catch_unwind();
        let outcome = match tokio::time::timeout(call.timeout, completion).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                tracing::error!(
                    model_id = %call.model.id(),
                    task_id = %reservation.task_id(),
                    "Provider call panicked"
                );
                Err(ProviderError::Unavailable {
                    model_id: call.model.id().to_string(),
                    reason: "provider call panicked".to_string(),
                })
            }
            Err(_) => Err(ProviderError::Timeout {
                model_id: call.model.id().to_string(),
                timeout_seconds: call.timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(completion) => {
                let transaction = ledger
                    .commit(reservation, call.model.id(), completion.actual_cost)
                    .await;
                Ok(Dispatched {
                    completion,
                    transaction,
                    elapsed: started.elapsed(),
                })
            }
            Err(e) => {
                ledger.release(reservation).await;
                Err(e)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;
    use crate::router::{SessionId, TaskId};
    use async_trait::async_trait;

    struct SlowProvider;

    #[async_trait]
    impl Provider for SlowProvider {
        async fn complete(
            &self,
            _model: &ModelDescriptor,
            _prompt: &str,
            _max_tokens: u32,
        ) -> Result<Completion, ProviderError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Completion {
                text: "done".to_string(),
                actual_cost: 0.01,
            })
        }
    }

    struct PanickingProvider;

    #[async_trait]
    impl Provider for PanickingProvider {
        async fn complete(
            &self,
            _model: &ModelDescriptor,
            _prompt: &str,
            _max_tokens: u32,
        ) -> Result<Completion, ProviderError> {
            panic!("bad usage counts");
        }
    }

    fn call(timeout: Duration) -> DispatchCall {
        DispatchCall {
            model: ModelDescriptor::new("m", Tier::Cheap, 0.00001, 8192, 1),
            prompt: "p".to_string(),
            max_tokens: 16,
            timeout,
        }
    }

    #[tokio::test]
    async fn test_dropped_handle_still_commits() {
        let ledger = Arc::new(BudgetLedger::new(1.0, 1.5, None));
        let reservation = ledger
            .reserve(&SessionId::anonymous(), &TaskId::from("t"), 0.02)
            .await
            .unwrap();
        let handle = spawn_dispatch(
            Arc::new(SlowProvider),
            ledger.clone(),
            reservation,
            call(Duration::from_secs(5)),
        );
        drop(handle);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = ledger.status().await;
        assert_eq!(status.spent, 0.01);
        assert_eq!(status.reserved, 0.0);
    }

    #[tokio::test]
    async fn test_timeout_releases_reservation() {
        let ledger = Arc::new(BudgetLedger::new(1.0, 1.5, None));
        let reservation = ledger
            .reserve(&SessionId::anonymous(), &TaskId::from("t"), 0.02)
            .await
            .unwrap();
        let result = spawn_dispatch(
            Arc::new(SlowProvider),
            ledger.clone(),
            reservation,
            call(Duration::from_millis(5)),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
        let status = ledger.status().await;
        assert_eq!(status.spent, 0.0);
        assert_eq!(status.reserved, 0.0);
    }

    #[tokio::test]
    async fn test_panicking_provider_releases_reservation() {
        let ledger = Arc::new(BudgetLedger::new(1.0, 1.5, None));
        let reservation = ledger
            .reserve(&SessionId::anonymous(), &TaskId::from("t"), 0.10)
            .await
            .unwrap();
        let result = spawn_dispatch(
            Arc::new(PanickingProvider),
            ledger.clone(),
            reservation,
            call(Duration::from_secs(5)),
        )
        .await
        .expect("dispatch task should not die with the provider");

        assert!(matches!(result, Err(ProviderError::Unavailable { .. })));
        let status = ledger.status().await;
        assert_eq!(status.reserved, 0.0);
        assert_eq!(status.remaining, 1.0);
    }
}
