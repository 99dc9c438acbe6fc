//! Aggregates converge to the state of their sources for any event order.

use std::collections::HashMap;

use dynaforge::repository::{QueryInput, QueryOptions};
use proptest::prelude::*;
use serde_json::json;

use crate::common::{record, subscription_event, Deployment};

const ACCOUNTS: [&str; 3] = ["a-1", "a-2", "a-3"];
const PLANS: [&str; 3] = ["ENTERPRISE", "SMALL_TEAM", "STARTER"];

#[derive(Debug, Clone)]
struct Publish {
    account: usize,
    cancelled: bool,
    plan: usize,
    settle: bool,
}

fn publish_strategy() -> impl Strategy<Value = Publish> {
    (0..ACCOUNTS.len(), any::<bool>(), 0..PLANS.len(), any::<bool>()).prop_map(
        |(account, cancelled, plan, settle)| Publish {
            account,
            cancelled,
            plan,
            settle,
        },
    )
}

/// Distinct days that are not in publish order.
fn day_of(index: usize) -> u32 {
    ((index * 7) % 31 + 1) as u32
}

async fn check_convergence(ops: Vec<Publish>) {
    let deployment = Deployment::new();
    let mut latest: HashMap<usize, (u32, bool, usize)> = HashMap::new();

    for (index, op) in ops.iter().enumerate() {
        let day = day_of(index);
        deployment
            .publish(&subscription_event(
                ACCOUNTS[op.account],
                day,
                op.cancelled,
                PLANS[op.plan],
            ))
            .await;
        let newest = latest.get(&op.account).map_or(true, |(d, _, _)| day > *d);
        if newest {
            latest.insert(op.account, (day, op.cancelled, op.plan));
        }
        if op.settle {
            deployment.settle().await;
        }
    }
    deployment.settle().await;

    let mut expected: HashMap<(bool, &str), i64> = HashMap::new();
    for (account, (_, cancelled, plan)) in &latest {
        let stored = deployment
            .find("Account", &record(json!({ "externalId": ACCOUNTS[*account] })))
            .await
            .unwrap();
        assert_eq!(stored.get_bool("cancelled"), Some(*cancelled));
        assert_eq!(stored.get_str("planName").as_deref(), Some(PLANS[*plan]));
        *expected.entry((*cancelled, PLANS[*plan])).or_default() += 1;
    }

    let plan_metrics = deployment
        .registry
        .get("PlanMetric")
        .unwrap()
        .query_all(
            &QueryInput::primary(record(json!({ "onFreeTrial": true }))),
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    for metric in &plan_metrics {
        let cancelled = metric.get_bool("cancelled").unwrap();
        let plan = metric.get_str("planName").unwrap();
        let want = expected.get(&(cancelled, plan.as_str())).copied().unwrap_or(0);
        assert_eq!(metric.get_i64("count"), Some(want), "{} {}", cancelled, plan);
    }
    assert!(expected.keys().all(|(cancelled, plan)| plan_metrics
        .iter()
        .any(|m| m.get_bool("cancelled") == Some(*cancelled)
            && m.get_str("planName").as_deref() == Some(*plan))));

    let total = deployment
        .count("Metric", &record(json!({ "onFreeTrial": true })))
        .await;
    assert_eq!(total, Some(latest.len() as i64));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_metrics_converge(ops in prop::collection::vec(publish_strategy(), 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(check_convergence(ops));
    }
}
