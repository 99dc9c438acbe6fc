//! Shared fixtures for integration tests.
//!
//! The subscription billing schema plus host implementations of its four
//! change handlers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dynaforge::bus::ChannelQueue;
use dynaforge::codec::{ComputeRegistry, Record};
use dynaforge::handlers::{Result as HandlerResult, SourceChange};
use dynaforge::repository::QueryInput;
use dynaforge::{
    compile, ChangeRuntime, Config, Enricher, Entity, HandlerContext, HandlerSet, Ir, MemoryStore,
    MultiReducer, Reactor, Reducer, RepositoryError, RepositoryRegistry, SchemaDocument,
};
use serde_json::{json, Value};

pub const SUBSCRIPTIONS_YAML: &str = include_str!("../fixtures/subscriptions.yaml");

pub fn subscriptions_ir() -> Arc<Ir> {
    let document = SchemaDocument::from_yaml(SUBSCRIPTIONS_YAML).unwrap();
    Arc::new(compile(&document).unwrap())
}

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

pub fn computes() -> ComputeRegistry {
    ComputeRegistry::new().with("accountDisplayName", |r: &Record| {
        json!(format!(
            "{} ({})",
            r.get("externalId").and_then(Value::as_str).unwrap_or_default(),
            r.get("planName").and_then(Value::as_str).unwrap_or_default()
        ))
    })
}

pub fn registry(store: Arc<MemoryStore>) -> RepositoryRegistry {
    RepositoryRegistry::new(subscriptions_ir(), store, &HashMap::new(), computes()).unwrap()
}

pub fn subscription_event(external_id: &str, day: u32, cancelled: bool, plan: &str) -> Record {
    record(json!({
        "externalId": external_id,
        "effectiveDate": format!("2024-01-{:02}T00:00:00.000Z", day),
        "cancelled": cancelled,
        "onFreeTrial": true,
        "planName": plan,
    }))
}

pub fn plan_key(cancelled: bool, plan: &str) -> Record {
    record(json!({ "onFreeTrial": true, "cancelled": cancelled, "planName": plan }))
}

fn pick(entity: &Entity, fields: &[&str]) -> Record {
    fields
        .iter()
        .filter_map(|f| entity.record().get(*f).map(|v| (f.to_string(), v.clone())))
        .collect()
}

const SUBSCRIPTION_FIELDS: [&str; 5] = [
    "externalId",
    "effectiveDate",
    "cancelled",
    "onFreeTrial",
    "planName",
];

pub struct SubscriptionToAccount;

#[async_trait]
impl Enricher for SubscriptionToAccount {
    fn target_key(&self, source: &Entity) -> Record {
        pick(source, &["externalId"])
    }

    async fn create(&self, _ctx: &HandlerContext, source: &Entity) -> HandlerResult<Option<Record>> {
        Ok(Some(pick(source, &SUBSCRIPTION_FIELDS)))
    }

    async fn update(
        &self,
        _ctx: &HandlerContext,
        source: &Entity,
        target: &Entity,
    ) -> HandlerResult<Option<Record>> {
        let event_date = source.get_str("effectiveDate");
        let target_date = target.get_str("effectiveDate");
        if event_date < target_date {
            return Ok(None);
        }
        let mut input = pick(source, &SUBSCRIPTION_FIELDS);
        // A redelivered event carries the target's own date.
        if event_date != target_date {
            if let Some(plan) = target.get("planName") {
                input.insert("lastPlanName".to_string(), plan);
            }
        }
        Ok(Some(input))
    }
}

pub struct AccountToPlanMetric;

#[async_trait]
impl MultiReducer for AccountToPlanMetric {
    fn group_fields(&self) -> Vec<String> {
        vec![
            "onFreeTrial".to_string(),
            "cancelled".to_string(),
            "planName".to_string(),
        ]
    }

    fn source_query(&self, group: &Record) -> HandlerResult<QueryInput> {
        Ok(QueryInput::index("plans", group.clone()))
    }

    fn target_key(&self, group: &Record) -> Record {
        group.clone()
    }

    async fn reduce(
        &self,
        _ctx: &HandlerContext,
        group: &Record,
        sources: &[Entity],
    ) -> HandlerResult<Option<Record>> {
        let mut input = group.clone();
        input.insert("count".to_string(), json!(sources.len()));
        Ok(Some(input))
    }
}

pub struct PlanMetricToMetric;

#[async_trait]
impl Reducer for PlanMetricToMetric {
    fn source_query(&self, source: &Entity) -> HandlerResult<QueryInput> {
        Ok(QueryInput::primary(pick(source, &["onFreeTrial"])))
    }

    fn target_key(&self, source: &Entity) -> Record {
        pick(source, &["onFreeTrial"])
    }

    async fn reduce(
        &self,
        _ctx: &HandlerContext,
        source: &Entity,
        sources: &[Entity],
    ) -> HandlerResult<Option<Record>> {
        let count: i64 = sources.iter().filter_map(|s| s.get_i64("count")).sum();
        let mut input = pick(source, &["onFreeTrial"]);
        input.insert("count".to_string(), json!(count));
        Ok(Some(input))
    }
}

pub struct AccountAudit;

#[async_trait]
impl Reactor for AccountAudit {
    async fn react(&self, ctx: &HandlerContext, change: &SourceChange) -> HandlerResult<()> {
        let mut input = pick(&change.current, &["externalId", "planName"]);
        input.insert("accountVersion".to_string(), json!(change.current.version()));
        // One entry per account version; a replayed change finds it written.
        match ctx.repository("AuditEntry")?.create(&input).await {
            Ok(_) | Err(RepositoryError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub fn subscription_handlers() -> HandlerSet {
    HandlerSet::new()
        .with_enricher("subscriptionToAccount", SubscriptionToAccount)
        .with_multi_reducer("accountToPlanMetric", AccountToPlanMetric)
        .with_reducer("planMetricToMetric", PlanMetricToMetric)
        .with_reactor("accountAudit", AccountAudit)
}

/// A store and a runtime wired with the subscription handlers.
pub struct Deployment {
    pub store: Arc<MemoryStore>,
    pub registry: RepositoryRegistry,
    pub runtime: ChangeRuntime,
}

impl Deployment {
    pub fn new() -> Self {
        dynaforge::utils::bootstrap::try_init_tracing();
        let config = Config::for_test();
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone());
        let queue = Arc::new(ChannelQueue::new(&config.queue));
        let runtime =
            ChangeRuntime::new(registry.clone(), &subscription_handlers(), queue, &config).unwrap();
        Self {
            store,
            registry,
            runtime,
        }
    }

    pub async fn publish(&self, event: &Record) {
        self.registry
            .get("SubscriptionEvent")
            .unwrap()
            .create(event)
            .await
            .unwrap();
    }

    pub async fn settle(&self) {
        self.runtime.run_until_idle(&self.store).await.unwrap();
    }

    pub async fn find(&self, type_name: &str, key: &Record) -> Option<Entity> {
        self.registry.get(type_name).unwrap().find(key).await.unwrap()
    }

    pub async fn count(&self, type_name: &str, key: &Record) -> Option<i64> {
        self.find(type_name, key).await.and_then(|e| e.get_i64("count"))
    }
}
