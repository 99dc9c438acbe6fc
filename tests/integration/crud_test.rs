//! Repository operations against the in-memory store.

use std::sync::Arc;

use dynaforge::repository::{QueryInput, QueryOptions};
use dynaforge::{MemoryStore, RepositoryError};
use serde_json::json;

use crate::common::{record, registry, subscription_event};

#[tokio::test]
async fn test_account_lifecycle() {
    let registry = registry(Arc::new(MemoryStore::new()));
    let accounts = registry.get("Account").unwrap();

    let created = accounts
        .create(&subscription_event("a-1", 1, false, "STARTER"))
        .await
        .unwrap();
    assert_eq!(created.version(), 1);
    assert!(created.get_str("publicId").is_some());
    assert_eq!(created.get_str("displayName").as_deref(), Some("a-1 (STARTER)"));

    let mut input = created.record().clone();
    input.insert("planName".to_string(), json!("ENTERPRISE"));
    let updated = accounts.update(&input).await.unwrap();
    assert_eq!(updated.version(), 2);
    assert_eq!(updated.get_str("publicId"), created.get_str("publicId"));

    // The same input is now one version behind.
    let err = accounts.update(&input).await.unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::OptimisticLocking {
            expected: Some(1),
            actual: Some(2),
            ..
        }
    ));

    let key = record(json!({ "externalId": "a-1" }));
    let deleted = accounts.delete(&key).await.unwrap();
    assert_eq!(deleted.get_str("planName").as_deref(), Some("ENTERPRISE"));
    assert!(accounts.find(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_ledger_entries_are_immutable() {
    let registry = registry(Arc::new(MemoryStore::new()));
    let events = registry.get("SubscriptionEvent").unwrap();

    let event = subscription_event("a-1", 1, false, "STARTER");
    events.create(&event).await.unwrap();

    assert!(matches!(
        events.create(&event).await.unwrap_err(),
        RepositoryError::AlreadyExists { .. }
    ));
    assert!(matches!(
        events.update(&event).await.unwrap_err(),
        RepositoryError::UnsupportedOperation { .. }
    ));
    assert!(matches!(
        events.blind_write(&event).await.unwrap_err(),
        RepositoryError::UnsupportedOperation { .. }
    ));
}

#[tokio::test]
async fn test_events_share_a_partition_with_their_account() {
    let registry = registry(Arc::new(MemoryStore::new()));
    let events = registry.get("SubscriptionEvent").unwrap();
    let accounts = registry.get("Account").unwrap();

    for day in [3, 1, 2] {
        events
            .create(&subscription_event("a-1", day, false, "STARTER"))
            .await
            .unwrap();
    }
    accounts
        .create(&subscription_event("a-1", 3, false, "STARTER"))
        .await
        .unwrap();

    let key = QueryInput::primary(record(json!({ "externalId": "a-1" })));
    let history = events.query_all(&key, &QueryOptions::default()).await.unwrap();
    let dates: Vec<String> = history
        .iter()
        .filter_map(|e| e.get_str("effectiveDate"))
        .collect();
    assert_eq!(
        dates,
        vec![
            "2024-01-01T00:00:00.000Z",
            "2024-01-02T00:00:00.000Z",
            "2024-01-03T00:00:00.000Z",
        ]
    );

    let summary = accounts.query_all(&key, &QueryOptions::default()).await.unwrap();
    assert_eq!(summary.len(), 1);
}

#[tokio::test]
async fn test_paginated_query_visits_every_record() {
    let registry = registry(Arc::new(MemoryStore::new()));
    let events = registry.get("SubscriptionEvent").unwrap();
    for day in 1..=5 {
        events
            .create(&subscription_event("a-1", day, false, "STARTER"))
            .await
            .unwrap();
    }

    let key = QueryInput::primary(record(json!({ "externalId": "a-1" })));
    let mut options = QueryOptions {
        limit: Some(2),
        ..QueryOptions::default()
    };
    let mut seen = 0;
    let mut pages = 0;
    loop {
        let page = events.query(&key, &options).await.unwrap();
        seen += page.items.len();
        pages += 1;
        match page.next_token {
            Some(token) => options.next_token = Some(token),
            None => break,
        }
    }
    assert_eq!(seen, 5);
    assert!(pages >= 3);
}
