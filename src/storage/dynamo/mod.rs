//! DynamoDB store.
//!
//! Structured expressions are rendered to DynamoDB expression syntax with
//! placeholder name/value maps; conditional-check failures surface as
//! [`StoreError::ConditionalCheckFailed`], everything else as
//! [`StoreError::Service`].

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::types::{AttributeValue as SdkValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use tracing::{debug, info};

use super::{
    AttributeValue, DeleteItemRequest, ExpressionAttributes, GetItemRequest, Item, QueryOutput,
    QueryRequest, Result, Store, StoreError, UpdateItemRequest,
};

pub struct DynamoStore {
    client: Client,
}

impl DynamoStore {
    pub async fn new(region: Option<&str>, endpoint_url: Option<&str>) -> Self {
        let mut builder = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            builder = builder.region(aws_config::Region::new(region.to_string()));
        }
        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        let config = builder.load().await;

        info!(region = ?region, endpoint = ?endpoint_url, "Connected to DynamoDB");
        Self {
            client: Client::new(&config),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn to_sdk(value: &AttributeValue) -> SdkValue {
    match value {
        AttributeValue::S(s) => SdkValue::S(s.clone()),
        AttributeValue::N(n) => SdkValue::N(n.clone()),
        AttributeValue::Bool(b) => SdkValue::Bool(*b),
        AttributeValue::Null(b) => SdkValue::Null(*b),
        AttributeValue::M(map) => SdkValue::M(to_sdk_item(map)),
        AttributeValue::L(items) => SdkValue::L(items.iter().map(to_sdk).collect()),
    }
}

fn to_sdk_item(item: &Item) -> HashMap<String, SdkValue> {
    item.iter().map(|(k, v)| (k.clone(), to_sdk(v))).collect()
}

fn from_sdk(value: &SdkValue) -> Result<AttributeValue> {
    Ok(match value {
        SdkValue::S(s) => AttributeValue::S(s.clone()),
        SdkValue::N(n) => AttributeValue::N(n.clone()),
        SdkValue::Bool(b) => AttributeValue::Bool(*b),
        SdkValue::Null(b) => AttributeValue::Null(*b),
        SdkValue::M(map) => AttributeValue::M(from_sdk_item(map)?),
        SdkValue::L(items) => {
            AttributeValue::L(items.iter().map(from_sdk).collect::<Result<_>>()?)
        }
        SdkValue::Ss(items) => AttributeValue::L(items.iter().cloned().map(AttributeValue::S).collect()),
        SdkValue::Ns(items) => AttributeValue::L(items.iter().cloned().map(AttributeValue::N).collect()),
        other => {
            return Err(StoreError::Serialization(format!(
                "unsupported attribute type: {:?}",
                other
            )))
        }
    })
}

fn from_sdk_item(item: &HashMap<String, SdkValue>) -> Result<Item> {
    item.iter()
        .map(|(k, v)| Ok((k.clone(), from_sdk(v)?)))
        .collect()
}

fn rendered_values(attrs: &ExpressionAttributes) -> Option<HashMap<String, SdkValue>> {
    Some(
        attrs
            .values
            .iter()
            .map(|(k, v)| (k.clone(), to_sdk(v)))
            .collect::<HashMap<_, _>>(),
    )
    .filter(|values| !values.is_empty())
}

fn rendered_names(attrs: &ExpressionAttributes) -> Option<HashMap<String, String>> {
    Some(attrs.names.clone()).filter(|names| !names.is_empty())
}

#[async_trait]
impl Store for DynamoStore {
    async fn update_item(&self, request: UpdateItemRequest) -> Result<Item> {
        let mut attrs = ExpressionAttributes::new();
        let update_expression = request.update.render(&mut attrs);
        let condition_expression = request.condition.as_ref().map(|c| c.render(&mut attrs));

        let output = self
            .client
            .update_item()
            .table_name(&request.table)
            .set_key(Some(to_sdk_item(&request.key)))
            .update_expression(update_expression)
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(rendered_names(&attrs))
            .set_expression_attribute_values(rendered_values(&attrs))
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|s| s.is_conditional_check_failed_exception())
                {
                    StoreError::ConditionalCheckFailed
                } else {
                    StoreError::Service(format!("DynamoDB update_item failed: {}", e))
                }
            })?;

        debug!(table = %request.table, "DynamoDB update_item");
        from_sdk_item(&output.attributes.unwrap_or_default())
    }

    async fn get_item(&self, request: GetItemRequest) -> Result<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(&request.table)
            .set_key(Some(to_sdk_item(&request.key)))
            .consistent_read(request.consistent_read)
            .send()
            .await
            .map_err(|e| StoreError::Service(format!("DynamoDB get_item failed: {}", e)))?;

        output.item.as_ref().map(from_sdk_item).transpose()
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> Result<Option<Item>> {
        let mut attrs = ExpressionAttributes::new();
        let condition_expression = request.condition.as_ref().map(|c| c.render(&mut attrs));

        let output = self
            .client
            .delete_item()
            .table_name(&request.table)
            .set_key(Some(to_sdk_item(&request.key)))
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(rendered_names(&attrs))
            .set_expression_attribute_values(rendered_values(&attrs))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|s| s.is_conditional_check_failed_exception())
                {
                    StoreError::ConditionalCheckFailed
                } else {
                    StoreError::Service(format!("DynamoDB delete_item failed: {}", e))
                }
            })?;

        output.attributes.as_ref().map(from_sdk_item).transpose()
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryOutput> {
        let mut attrs = ExpressionAttributes::new();
        let key_condition = request.key_condition.render(&mut attrs);
        let filter = request.filter.as_ref().map(|f| f.render(&mut attrs));
        let limit = request
            .limit
            .map(|l| i32::try_from(l).unwrap_or(i32::MAX));

        let output = self
            .client
            .query()
            .table_name(&request.table)
            .set_index_name(request.index.as_ref().map(|i| i.name.clone()))
            .key_condition_expression(key_condition)
            .set_filter_expression(filter)
            .set_expression_attribute_names(rendered_names(&attrs))
            .set_expression_attribute_values(rendered_values(&attrs))
            .set_limit(limit)
            .set_exclusive_start_key(request.exclusive_start_key.as_ref().map(to_sdk_item))
            .scan_index_forward(request.scan_forward)
            .consistent_read(request.consistent_read)
            .send()
            .await
            .map_err(|e| StoreError::Service(format!("DynamoDB query failed: {}", e)))?;

        let items = output
            .items()
            .iter()
            .map(from_sdk_item)
            .collect::<Result<Vec<_>>>()?;
        let last_evaluated_key = output
            .last_evaluated_key()
            .map(from_sdk_item)
            .transpose()?;

        debug!(
            table = %request.table,
            index = ?request.index.as_ref().map(|i| &i.name),
            count = items.len(),
            "DynamoDB query"
        );
        Ok(QueryOutput {
            items,
            last_evaluated_key,
        })
    }
}
