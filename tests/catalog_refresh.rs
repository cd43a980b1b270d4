//! Integration tests for catalog refresh against an OpenRouter-style listing

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tierroute::metrics::RefreshOutcome;
use tierroute::models::{DiscoveryError, HttpDiscovery, ModelId, Tier};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn listing() -> serde_json::Value {
    json!({
        "data": [
            {"id": "small:free", "created": 1_700_000_000, "context_length": 8192,
             "pricing": {"prompt": "0", "completion": "0"}},
            {"id": "big:free", "created": 1_700_000_000, "context_length": 131072,
             "pricing": {"prompt": "0", "completion": "0"}},
            {"id": "mid:free", "created": 1_710_000_000, "context_length": 32768,
             "pricing": {"prompt": "0", "completion": "0"}},
            {"id": "vendor/cheap", "created": 1_700_000_000, "context_length": 65536,
             "pricing": {"prompt": "0.000001", "completion": "0.000002"}},
            {"id": "vendor/premium", "created": 1_700_000_000, "context_length": 200000,
             "pricing": {"prompt": "0.000003", "completion": "0.000015"}},
            {"id": "openrouter/auto", "context_length": 2000000,
             "pricing": {"prompt": "-1", "completion": "-1"}}
        ]
    })
}

fn catalog_config() -> tierroute::config::Config {
    config_with(
        "daily_limit = 5.0",
        r#"
[catalog]
top_n = 1
backups = 1

[[tiers.free]]
id = "pinned-free"
"#,
    )
}

async fn discovery_for(server: &MockServer) -> Arc<HttpDiscovery> {
    Arc::new(
        HttpDiscovery::new(
            format!("{}/models", server.uri()),
            Some("test-key".to_string()),
            Duration::from_secs(5),
        )
        .expect("client should build"),
    )
}

fn ids(models: &[tierroute::models::ModelDescriptor]) -> Vec<&str> {
    models.iter().map(|m| m.id().as_str()).collect()
}

#[tokio::test]
async fn test_refresh_tiers_and_ranks_discovered_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .mount(&server)
        .await;

    let h = harness_with_discovery(catalog_config(), discovery_for(&server).await);
    let report = h.catalog.refresh_now().await.expect("refresh should succeed");

    assert_eq!(report.generation, 1);
    assert!(report.refreshed_at.is_some());
    assert_eq!(report.models[&Tier::Free], 3);
    assert_eq!(report.models[&Tier::Cheap], 1);
    assert_eq!(report.models[&Tier::Premium], 1);

    let snapshot = h.catalog.snapshot();
    // Pinned first, then top_n + backups by context window
    assert_eq!(
        ids(snapshot.models(Tier::Free)),
        vec!["pinned-free", "big:free", "mid:free"]
    );
    let ranks: Vec<u32> = snapshot.models(Tier::Free).iter().map(|m| m.rank()).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
    assert_eq!(ids(snapshot.models(Tier::Cheap)), vec!["vendor/cheap"]);
    assert_eq!(ids(snapshot.models(Tier::Premium)), vec!["vendor/premium"]);
    assert_eq!(snapshot.models(Tier::Premium)[0].cost_per_token(), 0.000015);
    assert_eq!(h.metrics.catalog_refreshes_count(RefreshOutcome::Success), 1);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .mount(&server)
        .await;

    let h = harness_with_discovery(catalog_config(), discovery_for(&server).await);
    h.catalog.refresh_now().await.unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = h.catalog.refresh_now().await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Status { status: 500 }));

    let snapshot = h.catalog.snapshot();
    assert_eq!(snapshot.generation(), 1);
    assert_eq!(snapshot.len(), 5);
    assert_eq!(h.metrics.catalog_refreshes_count(RefreshOutcome::Failure), 1);
}

#[tokio::test]
async fn test_empty_listing_counts_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let h = harness_with_discovery(catalog_config(), discovery_for(&server).await);
    let err = h.catalog.refresh_now().await.unwrap_err();

    assert!(matches!(err, DiscoveryError::Empty));
    assert_eq!(h.catalog.snapshot().generation(), 0);
    assert_eq!(
        ids(h.catalog.snapshot().models(Tier::Free)),
        vec!["pinned-free"]
    );
}

#[tokio::test]
async fn test_malformed_listing_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let h = harness_with_discovery(catalog_config(), discovery_for(&server).await);
    let err = h.catalog.refresh_now().await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Decode(_)));
}

#[tokio::test]
async fn test_concurrent_manual_refreshes_coalesce() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing())
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness_with_discovery(catalog_config(), discovery_for(&server).await);
    let (first, second) = tokio::join!(h.catalog.refresh_now(), h.catalog.refresh_now());

    assert_eq!(first.unwrap().generation, 1);
    assert_eq!(second.unwrap().generation, 1);
    assert_eq!(h.catalog.snapshot().generation(), 1);
}

#[tokio::test]
async fn test_refresh_keeps_cooldowns() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .mount(&server)
        .await;

    let h = harness_with_discovery(catalog_config(), discovery_for(&server).await);
    h.tracker.mark_throttled(&ModelId::from("pinned-free"));
    h.catalog.refresh_now().await.unwrap();

    let candidates = h.catalog.candidates(Tier::Free);
    assert_eq!(ids(&candidates), vec!["big:free", "mid:free"]);
}
