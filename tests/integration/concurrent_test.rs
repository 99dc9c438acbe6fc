//! Concurrent writers against one record.
//!
//! Blind writes serialize on the store's atomic version increment; versioned
//! updates race and exactly one writer per version wins.

use std::sync::Arc;

use dynaforge::{MemoryStore, RepositoryError};
use futures::future::join_all;
use serde_json::json;
use tokio::sync::Barrier;

use crate::common::{record, registry, subscription_event};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_blind_writes_count_every_write() {
    let registry = registry(Arc::new(MemoryStore::new()));
    let metrics = registry.get("Metric").unwrap();

    let num_concurrent = 16;
    let barrier = Arc::new(Barrier::new(num_concurrent));
    let mut handles = Vec::new();
    for i in 0..num_concurrent {
        let metrics = Arc::clone(&metrics);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            metrics
                .blind_write(&record(json!({ "onFreeTrial": true, "count": i })))
                .await
        }));
    }
    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }

    let metric = metrics
        .read(&record(json!({ "onFreeTrial": true })))
        .await
        .unwrap();
    assert_eq!(metric.version(), num_concurrent as i64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_versioned_updates_have_one_winner() {
    let registry = registry(Arc::new(MemoryStore::new()));
    let accounts = registry.get("Account").unwrap();
    let account = accounts
        .create(&subscription_event("a-1", 1, false, "STARTER"))
        .await
        .unwrap();

    let num_concurrent = 8;
    let barrier = Arc::new(Barrier::new(num_concurrent));
    let mut handles = Vec::new();
    for i in 0..num_concurrent {
        let accounts = Arc::clone(&accounts);
        let barrier = Arc::clone(&barrier);
        let mut input = account.record().clone();
        input.insert("planName".to_string(), json!(if i % 2 == 0 { "ENTERPRISE" } else { "SMALL_TEAM" }));
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            accounts.update(&input).await
        }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for result in join_all(handles).await {
        match result.unwrap() {
            Ok(updated) => {
                assert_eq!(updated.version(), 2);
                winners += 1;
            }
            Err(RepositoryError::OptimisticLocking {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Some(1));
                assert_eq!(actual, Some(2));
                conflicts += 1;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(conflicts, num_concurrent - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_have_one_winner() {
    let registry = registry(Arc::new(MemoryStore::new()));
    let accounts = registry.get("Account").unwrap();

    let attempts = (0..6).map(|_| {
        let accounts = Arc::clone(&accounts);
        tokio::spawn(async move {
            accounts
                .create(&subscription_event("a-1", 1, false, "STARTER"))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, RepositoryError::AlreadyExists { .. })));
}
