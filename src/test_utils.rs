//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::codec::{ComputeRegistry, Record};
use crate::compiler;
use crate::handlers::{
    Enricher, HandlerContext, HandlerSet, MultiReducer, Reactor, Reducer, Result as HandlerResult,
    SourceChange,
};
use crate::ir::{Ir, Model};
use crate::key::EncodeContext;
use crate::repository::{Entity, QueryInput, RepositoryError, RepositoryRegistry};
use crate::schema::SchemaDocument;
use crate::storage::Store;

pub const SUBSCRIPTIONS_YAML: &str = include_str!("../tests/fixtures/subscriptions.yaml");

pub fn subscriptions_document() -> SchemaDocument {
    SchemaDocument::from_yaml(SUBSCRIPTIONS_YAML).unwrap()
}

pub fn subscriptions_ir() -> Arc<Ir> {
    Arc::new(compiler::compile(&subscriptions_document()).unwrap())
}

pub fn model(ir: &Ir, name: &str) -> Arc<Model> {
    Arc::clone(ir.model(name).unwrap())
}

/// Build a record from a `json!` object literal.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
}

pub fn fixed_context() -> EncodeContext {
    EncodeContext::new(fixed_now(), "pub-0001")
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

pub fn registry(store: Arc<dyn Store>) -> RepositoryRegistry {
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

fn pick(entity: &Entity, fields: &[&str]) -> Record {
    fields
        .iter()
        .filter_map(|f| entity.record().get(*f).map(|v| (f.to_string(), v.clone())))
        .collect()
}

/// SubscriptionEvent -> Account: the latest event wins.
pub struct SubscriptionToAccount;

const SUBSCRIPTION_FIELDS: [&str; 5] = [
    "externalId",
    "effectiveDate",
    "cancelled",
    "onFreeTrial",
    "planName",
];

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

/// Account -> PlanMetric: accounts per (trial, cancelled, plan).
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

/// PlanMetric -> Metric: total per trial state.
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

/// Account -> AuditEntry, one ledger entry per account change.
#[derive(Default)]
pub struct AccountAudit {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Reactor for AccountAudit {
    async fn react(&self, ctx: &HandlerContext, change: &SourceChange) -> HandlerResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
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
        .with_reactor("accountAudit", AccountAudit::default())
}
