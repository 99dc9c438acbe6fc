use super::*;
use crate::schema::SchemaDocument;
use crate::test_utils::{fixed_context, model, record, subscriptions_ir};
use proptest::prelude::*;
use serde_json::json;

const LOGIN_YAML: &str = r#"
types:
  - name: Login
    directives:
      - ledger
      - composite_key:
          partition: { prefix: LOGIN, fields: [user] }
          sort: { fields: [createdAt] }
    fields:
      - { name: user, type: String, required: true }
"#;

fn login_model() -> std::sync::Arc<Model> {
    let document = SchemaDocument::from_yaml(LOGIN_YAML).unwrap();
    let ir = crate::compiler::compile(&document).unwrap();
    model(&ir, "Login")
}

#[test]
fn test_encode_joins_prefix_and_tokens() {
    let ir = subscriptions_ir();
    let event = model(&ir, "SubscriptionEvent");
    let ctx = fixed_context();
    let input = record(json!({
        "externalId": "cust-1",
        "effectiveDate": "2024-01-01T00:00:00Z",
    }));

    let pk = encode(&event, event.primary_key.partition(), EncodeMode::Read, &input, &ctx).unwrap();
    let sk = encode(&event, event.primary_key.sort().unwrap(), EncodeMode::Read, &input, &ctx).unwrap();

    assert_eq!(pk, "ACCOUNT#cust-1");
    // Dates are normalized to millisecond precision.
    assert_eq!(sk, "SUBSCRIPTION#2024-01-01T00:00:00.000Z");
}

#[test]
fn test_prefix_only_sort_key() {
    let ir = subscriptions_ir();
    let account = model(&ir, "Account");
    let sk = encode(
        &account,
        account.primary_key.sort().unwrap(),
        EncodeMode::Read,
        &record(json!({})),
        &fixed_context(),
    )
    .unwrap();
    assert_eq!(sk, "SUMMARY");
}

#[test]
fn test_scalar_tokens() {
    let ir = subscriptions_ir();
    let metric = model(&ir, "PlanMetric");
    let input = record(json!({"onFreeTrial": true, "cancelled": false, "planName": "ENTERPRISE"}));
    let ctx = fixed_context();

    assert_eq!(
        encode(&metric, metric.primary_key.partition(), EncodeMode::Read, &input, &ctx).unwrap(),
        "PLAN_METRIC#true"
    );
    assert_eq!(
        encode(&metric, metric.primary_key.sort().unwrap(), EncodeMode::Read, &input, &ctx).unwrap(),
        "false#ENTERPRISE"
    );
}

#[test]
fn test_created_at_depends_on_mode() {
    let login = login_model();
    let sort = login.primary_key.sort().unwrap();
    let ctx = fixed_context();
    let supplied = record(json!({"createdAt": "2023-06-01T12:00:00Z"}));
    let empty = record(json!({}));

    assert_eq!(
        encode(&login, sort, EncodeMode::Create, &supplied, &ctx).unwrap(),
        "2024-01-15T10:30:00.000Z"
    );
    assert_eq!(
        encode(&login, sort, EncodeMode::Read, &supplied, &ctx).unwrap(),
        "2023-06-01T12:00:00.000Z"
    );
    assert_eq!(
        encode(&login, sort, EncodeMode::Blind, &supplied, &ctx).unwrap(),
        "2023-06-01T12:00:00.000Z"
    );
    assert_eq!(
        encode(&login, sort, EncodeMode::Blind, &empty, &ctx).unwrap(),
        "2024-01-15T10:30:00.000Z"
    );
    assert_eq!(
        encode(&login, sort, EncodeMode::Read, &empty, &ctx).unwrap_err(),
        KeyError::MissingField("createdAt".to_string())
    );
}

#[test]
fn test_public_id_generated_only_on_create() {
    let ir = subscriptions_ir();
    let account = model(&ir, "Account");
    let spec = account.index("publicId").unwrap().partition().unwrap().clone();
    let ctx = fixed_context();
    let input = record(json!({"publicId": "existing"}));

    assert_eq!(encode(&account, &spec, EncodeMode::Create, &input, &ctx).unwrap(), "pub-0001");
    assert_eq!(encode(&account, &spec, EncodeMode::Read, &input, &ctx).unwrap(), "existing");
}

#[test]
fn test_missing_and_invalid_fields() {
    let ir = subscriptions_ir();
    let event = model(&ir, "SubscriptionEvent");
    let ctx = fixed_context();
    let sort = event.primary_key.sort().unwrap();

    assert_eq!(
        encode(&event, sort, EncodeMode::Read, &record(json!({"effectiveDate": null})), &ctx)
            .unwrap_err(),
        KeyError::MissingField("effectiveDate".to_string())
    );
    assert!(matches!(
        encode(&event, sort, EncodeMode::Read, &record(json!({"effectiveDate": "yesterday"})), &ctx),
        Err(KeyError::InvalidValue { .. })
    ));
}

#[test]
fn test_partial_key_ends_at_token_boundary() {
    let ir = subscriptions_ir();
    let account = model(&ir, "Account");
    let plans = account.index("plans").unwrap();
    let sort = plans.sort().unwrap();
    let ctx = fixed_context();

    let partial = encode_partial(&account, sort, &record(json!({"cancelled": false})), &ctx).unwrap();
    assert_eq!(partial.value, "false#");
    assert!(!partial.complete);

    let full = encode_partial(
        &account,
        sort,
        &record(json!({"cancelled": false, "planName": "STARTER"})),
        &ctx,
    )
    .unwrap();
    assert_eq!(full.value, "false#STARTER");
    assert!(full.complete);

    let none = encode_partial(&account, sort, &record(json!({})), &ctx).unwrap();
    assert_eq!(none.value, "");
    assert!(!none.complete);
}

#[test]
fn test_can_encode() {
    let login = login_model();
    let sort = login.primary_key.sort().unwrap();
    let empty = record(json!({}));

    assert!(can_encode(sort, EncodeMode::Create, &empty));
    assert!(can_encode(sort, EncodeMode::Blind, &empty));
    assert!(!can_encode(sort, EncodeMode::Read, &empty));
}

proptest! {
    #[test]
    fn prop_encode_is_deterministic(
        external_id in "[a-zA-Z0-9_-]{1,16}",
        secs in 0i64..4_000_000_000,
        mode in prop_oneof![Just(EncodeMode::Create), Just(EncodeMode::Read), Just(EncodeMode::Blind)],
    ) {
        let ir = subscriptions_ir();
        let event = model(&ir, "SubscriptionEvent");
        let date = chrono::DateTime::from_timestamp(secs, 0).unwrap();
        let input = record(json!({
            "externalId": external_id,
            "effectiveDate": format_timestamp(date),
        }));
        let ctx = fixed_context();

        for spec in [event.primary_key.partition(), event.primary_key.sort().unwrap()] {
            let first = encode(&event, spec, mode, &input, &ctx).unwrap();
            let second = encode(&event, spec, mode, &input, &ctx.clone()).unwrap();
            prop_assert_eq!(first, second);
        }
    }

    #[test]
    fn prop_tokens_keep_field_order(a in "[a-z]{1,8}", b in "[A-Z]{1,8}") {
        let ir = subscriptions_ir();
        let metric = model(&ir, "PlanMetric");
        let input = record(json!({"cancelled": a, "planName": b}));
        let sk = encode(&metric, metric.primary_key.sort().unwrap(), EncodeMode::Read, &input, &fixed_context()).unwrap();
        prop_assert_eq!(sk, format!("{}#{}", a, b));
    }
}
