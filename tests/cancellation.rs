//! Integration tests for cancellation
//!
//! Tasks that have not started are never charged; a call already in flight
//! completes in the background and its cost is recorded.

mod common;

use common::*;
use std::time::Duration;
use tierroute::error::AppError;
use tierroute::router::{Request, SessionId};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_cancel_before_start_charges_nothing() {
    let h = harness(default_config());
    h.provider.reply("free-a", "Paris", 0.001);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h
        .router
        .submit_with_cancel(Request::new(SIMPLE_PROMPT, SessionId::anonymous()), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Cancelled { .. }));
    assert!(h.provider.calls().is_empty());
    assert!(h.ledger.transactions().await.is_empty());
}

#[tokio::test]
async fn test_cancel_during_execution_still_records_cost() {
    let h = harness(default_config());
    h.provider.set(
        "free-a",
        Behavior::Slow {
            delay: Duration::from_millis(200),
            text: "Paris".to_string(),
            cost: 0.003,
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = h
        .router
        .submit_with_cancel(Request::new(SIMPLE_PROMPT, SessionId::anonymous()), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Cancelled { .. }));

    // The in-flight call settles on its own
    tokio::time::sleep(Duration::from_millis(400)).await;
    let status = h.ledger.status().await;
    assert!(approx(status.spent, 0.003), "spent was {}", status.spent);
    assert!(approx(status.reserved, 0.0));
}

#[tokio::test]
async fn test_cancel_between_subtasks_keeps_completed() {
    let h = harness(default_config());
    h.provider
        .reply("premium-a", "1. first\n2. second\n3. third", 0.01);
    h.provider.set(
        "free-a",
        Behavior::Slow {
            delay: Duration::from_millis(150),
            text: "ok".to_string(),
            cost: 0.001,
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        // First subtask finishes at ~150ms; cancel while the second runs
        tokio::time::sleep(Duration::from_millis(220)).await;
        trigger.cancel();
    });

    let err = h
        .router
        .submit_with_cancel(Request::new(COMPLEX_PROMPT, SessionId::anonymous()), cancel)
        .await
        .unwrap_err();

    match &err {
        AppError::Cancelled { completed } => {
            assert_eq!(completed.len(), 1);
            assert_eq!(completed[0].description, "first");
        }
        other => panic!("expected Cancelled, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    // Planning + first subtask + the in-flight second subtask; third never ran
    assert_eq!(h.provider.calls().len(), 3);
    assert!(approx(h.ledger.status().await.spent, 0.012));
}
