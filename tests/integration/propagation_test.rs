//! Change propagation through the subscription handler graph.

use serde_json::json;

use crate::common::{plan_key, record, subscription_event, Deployment};

#[tokio::test]
async fn test_new_subscription_reaches_summary_metric() {
    let deployment = Deployment::new();
    deployment
        .publish(&subscription_event("a-1", 1, false, "ENTERPRISE"))
        .await;
    deployment.settle().await;

    let account = deployment
        .find("Account", &record(json!({ "externalId": "a-1" })))
        .await
        .unwrap();
    assert_eq!(account.version(), 1);
    assert_eq!(account.get_str("planName").as_deref(), Some("ENTERPRISE"));

    assert_eq!(
        deployment.count("PlanMetric", &plan_key(false, "ENTERPRISE")).await,
        Some(1)
    );
    assert_eq!(
        deployment
            .count("Metric", &record(json!({ "onFreeTrial": true })))
            .await,
        Some(1)
    );
}

#[tokio::test]
async fn test_cancellation_moves_account_between_plan_metrics() {
    let deployment = Deployment::new();
    deployment
        .publish(&subscription_event("a-1", 1, false, "ENTERPRISE"))
        .await;
    deployment.settle().await;

    deployment
        .publish(&subscription_event("a-1", 2, true, "ENTERPRISE"))
        .await;
    deployment.settle().await;

    let account = deployment
        .find("Account", &record(json!({ "externalId": "a-1" })))
        .await
        .unwrap();
    assert_eq!(account.version(), 2);
    assert_eq!(account.get_bool("cancelled"), Some(true));
    assert_eq!(account.get_str("lastPlanName").as_deref(), Some("ENTERPRISE"));

    assert_eq!(
        deployment.count("PlanMetric", &plan_key(false, "ENTERPRISE")).await,
        Some(0)
    );
    assert_eq!(
        deployment.count("PlanMetric", &plan_key(true, "ENTERPRISE")).await,
        Some(1)
    );
    assert_eq!(
        deployment
            .count("Metric", &record(json!({ "onFreeTrial": true })))
            .await,
        Some(1)
    );
}

#[tokio::test]
async fn test_out_of_order_events_keep_the_latest() {
    let deployment = Deployment::new();
    deployment
        .publish(&subscription_event("a-1", 5, false, "SMALL_TEAM"))
        .await;
    deployment
        .publish(&subscription_event("a-1", 2, false, "STARTER"))
        .await;
    deployment.settle().await;

    let account = deployment
        .find("Account", &record(json!({ "externalId": "a-1" })))
        .await
        .unwrap();
    assert_eq!(account.get_str("planName").as_deref(), Some("SMALL_TEAM"));
    assert_eq!(
        deployment.count("PlanMetric", &plan_key(false, "SMALL_TEAM")).await,
        Some(1)
    );
    assert_eq!(
        deployment.count("PlanMetric", &plan_key(false, "STARTER")).await,
        None
    );
}

#[tokio::test]
async fn test_every_account_change_is_audited() {
    let deployment = Deployment::new();
    for (day, plan) in [(1, "STARTER"), (2, "SMALL_TEAM"), (3, "ENTERPRISE")] {
        deployment
            .publish(&subscription_event("a-1", day, false, plan))
            .await;
        deployment.settle().await;
    }

    let audit = deployment.store.items("Audit").await;
    assert_eq!(audit.len(), 3);
}

#[tokio::test]
async fn test_replayed_stream_batch_is_idempotent() {
    let deployment = Deployment::new();
    deployment
        .publish(&subscription_event("a-1", 1, false, "STARTER"))
        .await;
    let changes = deployment.store.drain_changes().await;

    // At-least-once delivery: the same batch arrives twice.
    assert!(deployment
        .runtime
        .process_stream_batch(changes.clone())
        .await
        .is_success());
    assert!(deployment
        .runtime
        .process_stream_batch(changes)
        .await
        .is_success());
    deployment.settle().await;

    let account = deployment
        .find("Account", &record(json!({ "externalId": "a-1" })))
        .await
        .unwrap();
    assert_eq!(account.version(), 1);
    assert_eq!(deployment.store.items("Audit").await.len(), 1);
    assert_eq!(
        deployment.count("PlanMetric", &plan_key(false, "STARTER")).await,
        Some(1)
    );
    assert_eq!(
        deployment
            .count("Metric", &record(json!({ "onFreeTrial": true })))
            .await,
        Some(1)
    );
}
