//! Query inputs, pagination, and key-condition construction.

use base64::prelude::*;
use serde_json::Value;

use super::{Entity, RepositoryError, Result};
use crate::codec::{Codec, Record};
use crate::ir::{IndexAttribute, KeySpec, Model, SecondaryIndex, PARTITION_KEY_COLUMN, SORT_KEY_COLUMN};
use crate::key::{self, EncodeContext, EncodeMode};
use crate::storage::{AttributeValue, Condition, IndexKeys, Item, KeyCondition, SortOperator};

/// Which key a query runs against and the key field values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryInput {
    /// Secondary index name; `None` for the primary key.
    pub index: Option<String>,
    /// Partition fields (all required) and leading sort fields.
    pub key: Record,
}

impl QueryInput {
    pub fn primary(key: Record) -> Self {
        Self { index: None, key }
    }

    pub fn index(name: impl Into<String>, key: Record) -> Self {
        Self {
            index: Some(name.into()),
            key,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub next_token: Option<String>,
    /// Sort-key comparison; `begins_with` by default.
    pub operator: SortOperator,
    pub reverse: bool,
    /// Extra filter over stored attributes, applied after the limit.
    pub filter: Option<Condition>,
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Entity>,
    pub next_token: Option<String>,
    pub has_next_page: bool,
}

pub fn encode_token(key: &Item) -> Result<String> {
    let json = serde_json::to_vec(key).map_err(|e| RepositoryError::Unexpected(e.to_string()))?;
    Ok(BASE64_STANDARD.encode(json))
}

pub fn decode_token(token: &str) -> Result<Item> {
    let bytes = BASE64_STANDARD
        .decode(token)
        .map_err(|e| RepositoryError::Unexpected(format!("invalid pagination token: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RepositoryError::Unexpected(format!("invalid pagination token: {}", e)))
}

/// Key condition plus the index layout for a query input.
pub(super) fn key_condition(
    codec: &Codec,
    input: &QueryInput,
    operator: SortOperator,
    ctx: &EncodeContext,
) -> Result<(KeyCondition, Option<IndexKeys>)> {
    let model = codec.model();
    match &input.index {
        None => {
            let partition = key::encode(model, model.primary_key.partition(), EncodeMode::Read, &input.key, ctx)?;
            let mut condition =
                KeyCondition::partition(PARTITION_KEY_COLUMN, AttributeValue::S(partition));
            if let Some(sort) = model.primary_key.sort() {
                condition = with_encoded_sort(condition, model, sort, SORT_KEY_COLUMN, operator, &input.key, ctx)?;
            }
            Ok((condition, None))
        }
        Some(name) => {
            let index = model.index(name).ok_or_else(|| {
                RepositoryError::Unexpected(format!(
                    "{} has no index '{}'",
                    model.type_name, name
                ))
            })?;
            let mut condition = match index {
                SecondaryIndex::Gsi(gsi) => KeyCondition::partition(
                    gsi.partition_attribute.name.clone(),
                    attribute_value(codec, &gsi.partition, &gsi.partition_attribute, &input.key, ctx)?,
                ),
                SecondaryIndex::Lsi(_) => KeyCondition::partition(
                    PARTITION_KEY_COLUMN,
                    AttributeValue::S(
                        key::encode(model, model.primary_key.partition(), EncodeMode::Read, &input.key, ctx)?,
                    ),
                ),
            };

            if let (Some(spec), Some(attribute)) = (index.sort(), index.sort_attribute()) {
                match &attribute.reuses_field {
                    Some(field) if input.key.get(field).is_some_and(|v| !v.is_null()) => {
                        condition = condition.with_sort(
                            attribute.name.clone(),
                            operator,
                            attribute_value(codec, spec, attribute, &input.key, ctx)?,
                        );
                    }
                    Some(_) => {}
                    None => {
                        condition = with_encoded_sort(condition, model, spec, &attribute.name, operator, &input.key, ctx)?;
                    }
                }
            }

            let keys = IndexKeys {
                name: index.name().to_string(),
                partition_attribute: index.partition_attribute_name().to_string(),
                sort_attribute: index.sort_attribute().map(|a| a.name.clone()),
                projection: index.projection().clone(),
            };
            Ok((condition, Some(keys)))
        }
    }
}

fn with_encoded_sort(
    condition: KeyCondition,
    model: &Model,
    spec: &KeySpec,
    attribute: &str,
    operator: SortOperator,
    input: &Record,
    ctx: &EncodeContext,
) -> Result<KeyCondition> {
    let partial = key::encode_partial(model, spec, input, ctx)?;
    if partial.value.is_empty() && operator == SortOperator::BeginsWith {
        return Ok(condition);
    }
    Ok(condition.with_sort(attribute, operator, AttributeValue::S(partial.value)))
}

fn attribute_value(
    codec: &Codec,
    spec: &KeySpec,
    attribute: &IndexAttribute,
    input: &Record,
    ctx: &EncodeContext,
) -> Result<AttributeValue> {
    match &attribute.reuses_field {
        Some(name) => {
            let field = codec.model().field(name).ok_or_else(|| {
                RepositoryError::Unexpected(format!("unknown field '{}'", name))
            })?;
            let value = input.get(name).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                return Err(key::KeyError::MissingField(name.clone()).into());
            }
            Ok(codec.encode_value(field, &value)?)
        }
        None => Ok(AttributeValue::S(
            key::encode(codec.model(), spec, EncodeMode::Read, input, ctx)?,
        )),
    }
}
