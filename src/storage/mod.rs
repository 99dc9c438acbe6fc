//! Storage layer.
//!
//! The [`Store`] trait is the single-item, partition/sort-key store the rest
//! of the crate writes through: conditional update-style writes that return
//! the post-write item, point reads, conditional deletes, and key-condition
//! queries. Two implementations:
//!
//! - [`MemoryStore`]: in-process tables with atomic conditions and a change
//!   stream, for local development and tests.
//! - `DynamoStore` (feature `dynamo`): Amazon DynamoDB via `aws-sdk-dynamodb`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::config::{StorageConfig, StorageType};
use crate::ir::Projection;

mod expression;
mod memory;
mod value;

#[cfg(feature = "dynamo")]
pub mod dynamo;

pub use expression::{
    Condition, ExpressionAttributes, KeyCondition, SortCondition, SortOperator, UpdateAction,
    UpdateExpression, UpdateOp,
};
pub use memory::MemoryStore;
pub use value::{item_to_json, AttributeValue, Item};

#[cfg(feature = "dynamo")]
pub use dynamo::DynamoStore;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Conditional check failed")]
    ConditionalCheckFailed,

    #[error("Store service error: {0}")]
    Service(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid request: {0}")]
    Validation(String),
}

/// Update-style write returning the full post-write item.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateItemRequest {
    pub table: String,
    pub key: Item,
    pub update: UpdateExpression,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetItemRequest {
    pub table: String,
    pub key: Item,
    pub consistent_read: bool,
}

/// Delete returning the removed item, if there was one.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteItemRequest {
    pub table: String,
    pub key: Item,
    pub condition: Option<Condition>,
}

/// The key layout of a secondary index as seen by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexKeys {
    pub name: String,
    pub partition_attribute: String,
    pub sort_attribute: Option<String>,
    pub projection: Projection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub table: String,
    pub index: Option<IndexKeys>,
    pub key_condition: KeyCondition,
    /// Applied after `limit`, as the store does.
    pub filter: Option<Condition>,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
    pub scan_forward: bool,
    pub consistent_read: bool,
}

impl QueryRequest {
    pub fn new(table: impl Into<String>, key_condition: KeyCondition) -> Self {
        Self {
            table: table.into(),
            index: None,
            key_condition,
            filter: None,
            limit: None,
            exclusive_start_key: None,
            scan_forward: true,
            consistent_read: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub items: Vec<Item>,
    /// Present when more items may follow.
    pub last_evaluated_key: Option<Item>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Apply `update` if `condition` holds, creating the item when absent.
    async fn update_item(&self, request: UpdateItemRequest) -> Result<Item>;

    async fn get_item(&self, request: GetItemRequest) -> Result<Option<Item>>;

    async fn delete_item(&self, request: DeleteItemRequest) -> Result<Option<Item>>;

    async fn query(&self, request: QueryRequest) -> Result<QueryOutput>;
}

/// Initialize the store named by configuration.
pub async fn init_store(config: &StorageConfig) -> Result<Arc<dyn Store>> {
    info!(storage_type = %config.storage_type, "Initializing store");

    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "dynamo")]
        StorageType::Dynamo => {
            let store = DynamoStore::new(config.region.as_deref(), config.endpoint.as_deref()).await;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "dynamo"))]
        StorageType::Dynamo => {
            error!("DynamoDB storage requested but 'dynamo' feature is not enabled");
            Err(StoreError::Validation(
                "DynamoDB feature not enabled".to_string(),
            ))
        }
    }
}
