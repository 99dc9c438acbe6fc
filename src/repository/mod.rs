//! Per-model CRUD and query operations.
//!
//! Every operation shares one identity path: the primary key derived from
//! the input by the key encoder. Writes are update-style so the store hands
//! back the full post-write item without a second round trip.
//!
//! | operation     | condition                          | on conditional failure       |
//! |---------------|------------------------------------|------------------------------|
//! | `create`      | `attribute_not_exists(pk)`         | `AlreadyExists`              |
//! | `update`      | `attribute_exists(pk)` [`AND _v = version`] | re-read: `NotFound` or `OptimisticLocking` |
//! | `blind_write` | none                               | n/a                          |
//! | `delete`      | `attribute_exists(pk)`             | `NotFound`                   |

mod entity;
mod error;
mod query;
mod registry;

use std::sync::Arc;

use tracing::{debug, warn};

pub use entity::Entity;
pub use error::{RepositoryError, Result};
pub use query::{decode_token, encode_token, Page, QueryInput, QueryOptions};
pub use registry::RepositoryRegistry;

use crate::codec::{read_version, Codec, ComputeRegistry, Record, WriteMode};
use crate::ir::{
    Model, Projection, ENTITY_TYPE_COLUMN, PARTITION_KEY_COLUMN, SORT_KEY_COLUMN, VERSION_COLUMN,
};
use crate::key::{EncodeContext, EncodeMode};
use crate::storage::{
    AttributeValue, Condition, DeleteItemRequest, GetItemRequest, Item, QueryRequest, Store,
    StoreError, UpdateItemRequest,
};

/// Operations for one model against its physical table.
pub struct Repository {
    codec: Codec,
    table: String,
    store: Arc<dyn Store>,
}

impl Repository {
    pub fn new(
        model: Arc<Model>,
        table: impl Into<String>,
        store: Arc<dyn Store>,
        computes: ComputeRegistry,
    ) -> Self {
        Self {
            codec: Codec::new(model, computes),
            table: table.into(),
            store,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        self.codec.model()
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Physical table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn type_name(&self) -> &str {
        &self.model().type_name
    }

    fn require_mutable(&self, operation: &str) -> Result<()> {
        if self.model().is_mutable() {
            Ok(())
        } else {
            Err(RepositoryError::UnsupportedOperation {
                model: self.type_name().to_string(),
                operation: operation.to_string(),
            })
        }
    }

    /// Conditional insert; fails with `AlreadyExists` when the key is taken.
    pub async fn create(&self, input: &Record) -> Result<Entity> {
        self.create_with(input, &EncodeContext::fresh()).await
    }

    pub async fn create_with(&self, input: &Record, ctx: &EncodeContext) -> Result<Entity> {
        let marshalled = self.codec.marshall(input, WriteMode::Create, ctx)?;
        let id = self.codec.entity_id(&marshalled.key);

        let request = UpdateItemRequest {
            table: self.table.clone(),
            key: marshalled.key,
            update: marshalled.update,
            condition: Some(Condition::NotExists(PARTITION_KEY_COLUMN.to_string())),
        };
        match self.store.update_item(request).await {
            Ok(item) => {
                debug!(model = %self.type_name(), id = %id, "Created");
                self.entity(&item)
            }
            Err(StoreError::ConditionalCheckFailed) => Err(RepositoryError::AlreadyExists {
                model: self.type_name().to_string(),
                id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Point read; fails with `NotFound` or `DataIntegrity`.
    pub async fn read(&self, key: &Record) -> Result<Entity> {
        let item_key = self.key(key)?;
        match self.get(&item_key, self.model().consistent).await? {
            Some(item) => self.entity(&item),
            None => Err(self.not_found(&item_key)),
        }
    }

    /// Point read that treats absence as `None`.
    pub async fn find(&self, key: &Record) -> Result<Option<Entity>> {
        match self.read(key).await {
            Ok(entity) => Ok(Some(entity)),
            Err(RepositoryError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Update an existing record, checking `version` when supplied.
    pub async fn update(&self, input: &Record) -> Result<Entity> {
        self.update_with(input, &EncodeContext::fresh()).await
    }

    pub async fn update_with(&self, input: &Record, ctx: &EncodeContext) -> Result<Entity> {
        self.require_mutable("update")?;
        let marshalled = self.codec.marshall(input, WriteMode::Update, ctx)?;
        let expected = read_version(input);

        let mut condition = Condition::Exists(PARTITION_KEY_COLUMN.to_string());
        if let Some(version) = expected {
            condition = condition.and(Condition::equals(
                VERSION_COLUMN,
                AttributeValue::number(version),
            ));
        }

        let key = marshalled.key.clone();
        let request = UpdateItemRequest {
            table: self.table.clone(),
            key: marshalled.key,
            update: marshalled.update,
            condition: Some(condition),
        };
        match self.store.update_item(request).await {
            Ok(item) => {
                debug!(model = %self.type_name(), version = ?expected, "Updated");
                self.entity(&item)
            }
            Err(StoreError::ConditionalCheckFailed) => {
                // Disambiguate after the fact: absent, or a newer version.
                match self.get(&key, true).await? {
                    None => Err(self.not_found(&key)),
                    Some(current) => {
                        let actual = current.get(VERSION_COLUMN).and_then(AttributeValue::as_i64);
                        warn!(
                            model = %self.type_name(),
                            expected = ?expected,
                            actual = ?actual,
                            "Optimistic locking conflict"
                        );
                        Err(RepositoryError::OptimisticLocking {
                            model: self.type_name().to_string(),
                            id: self.codec.entity_id(&key),
                            expected,
                            actual,
                        })
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Unconditional upsert; the version is an atomic `+1`.
    pub async fn blind_write(&self, input: &Record) -> Result<Entity> {
        self.blind_write_with(input, &EncodeContext::fresh()).await
    }

    pub async fn blind_write_with(&self, input: &Record, ctx: &EncodeContext) -> Result<Entity> {
        self.require_mutable("blind write")?;
        let marshalled = self.codec.marshall(input, WriteMode::Blind, ctx)?;
        let request = UpdateItemRequest {
            table: self.table.clone(),
            key: marshalled.key,
            update: marshalled.update,
            condition: None,
        };
        let item = self.store.update_item(request).await?;
        debug!(model = %self.type_name(), "Blind write");
        self.entity(&item)
    }

    /// Delete an existing record and return it.
    pub async fn delete(&self, key: &Record) -> Result<Entity> {
        self.require_mutable("delete")?;
        let item_key = self.key(key)?;
        let request = DeleteItemRequest {
            table: self.table.clone(),
            key: item_key.clone(),
            condition: Some(Condition::Exists(PARTITION_KEY_COLUMN.to_string())),
        };
        match self.store.delete_item(request).await {
            Ok(Some(item)) => {
                debug!(model = %self.type_name(), "Deleted");
                self.entity(&item)
            }
            Ok(None) | Err(StoreError::ConditionalCheckFailed) => Err(self.not_found(&item_key)),
            Err(e) => Err(e.into()),
        }
    }

    /// One page of records matching a key condition.
    pub async fn query(&self, input: &QueryInput, options: &QueryOptions) -> Result<Page> {
        let ctx = EncodeContext::fresh();
        let (key_condition, index) = query::key_condition(&self.codec, input, options.operator, &ctx)?;

        let refetch = index
            .as_ref()
            .is_some_and(|i| i.projection != Projection::All);
        // Partial projections lack the discriminator; refetched items are
        // checked for it instead.
        let filter = if refetch {
            options.filter.clone()
        } else {
            let type_filter = Condition::equals(
                ENTITY_TYPE_COLUMN,
                AttributeValue::string(self.type_name()),
            );
            Some(match &options.filter {
                Some(extra) => type_filter.and(extra.clone()),
                None => type_filter,
            })
        };

        let request = QueryRequest {
            table: self.table.clone(),
            consistent_read: index.is_none() && self.model().consistent,
            index,
            key_condition,
            filter,
            limit: options.limit,
            exclusive_start_key: options.next_token.as_deref().map(decode_token).transpose()?,
            scan_forward: !options.reverse,
        };
        let output = self.store.query(request).await?;

        let mut items = Vec::with_capacity(output.items.len());
        for item in &output.items {
            if refetch {
                let key = self.primary_key_of(item);
                match self.get(&key, false).await? {
                    Some(full) if self.owns(&full) => items.push(self.entity(&full)?),
                    // Another model sharing the index, or deleted since the
                    // index read.
                    _ => continue,
                }
            } else {
                items.push(self.entity(item)?);
            }
        }

        let next_token = output.last_evaluated_key.as_ref().map(encode_token).transpose()?;
        debug!(
            model = %self.type_name(),
            index = ?input.index,
            count = items.len(),
            "Query"
        );
        Ok(Page {
            items,
            has_next_page: next_token.is_some(),
            next_token,
        })
    }

    /// Every matching record, following pagination to the end.
    pub async fn query_all(&self, input: &QueryInput, options: &QueryOptions) -> Result<Vec<Entity>> {
        let mut options = options.clone();
        let mut all = Vec::new();
        loop {
            let page = self.query(input, &options).await?;
            all.extend(page.items);
            match page.next_token {
                Some(token) => options.next_token = Some(token),
                None => return Ok(all),
            }
        }
    }

    /// Decode an item of this model, e.g. a stream image.
    pub fn entity(&self, item: &Item) -> Result<Entity> {
        let record = self
            .codec
            .unmarshall(item)
            .map_err(|e| RepositoryError::DataIntegrity {
                model: self.type_name().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Entity::new(
            Arc::clone(self.model()),
            record,
            self.codec.computes().clone(),
        ))
    }

    fn key(&self, input: &Record) -> Result<Item> {
        Ok(self
            .codec
            .primary_key(input, EncodeMode::Read, &EncodeContext::fresh())?)
    }

    fn owns(&self, item: &Item) -> bool {
        item.get(ENTITY_TYPE_COLUMN).and_then(AttributeValue::as_str) == Some(self.type_name())
    }

    fn primary_key_of(&self, item: &Item) -> Item {
        let mut key = Item::new();
        for attribute in [PARTITION_KEY_COLUMN, SORT_KEY_COLUMN] {
            if let Some(value) = item.get(attribute) {
                key.insert(attribute.to_string(), value.clone());
            }
        }
        key
    }

    async fn get(&self, key: &Item, consistent_read: bool) -> Result<Option<Item>> {
        Ok(self
            .store
            .get_item(GetItemRequest {
                table: self.table.clone(),
                key: key.clone(),
                consistent_read,
            })
            .await?)
    }

    fn not_found(&self, key: &Item) -> RepositoryError {
        RepositoryError::NotFound {
            model: self.type_name().to_string(),
            id: self.codec.entity_id(key),
        }
    }
}
