//! In-memory store.
//!
//! Tables live behind one `RwLock`, so every conditional write evaluates its
//! condition and applies its update atomically. Each mutation appends a
//! [`ChangeRecord`] to an internal stream drained with
//! [`MemoryStore::drain_changes`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    DeleteItemRequest, GetItemRequest, IndexKeys, Item, QueryOutput, QueryRequest, Result, Store,
    StoreError, UpdateItemRequest,
};
use crate::ir::{Projection, PARTITION_KEY_COLUMN, SORT_KEY_COLUMN};
use crate::stream::{ChangeRecord, EventType};

/// (pk, sk) of a stored item; `sk` is empty for simple tables.
type StoredKey = (String, String);

#[derive(Default)]
struct Inner {
    tables: HashMap<String, BTreeMap<StoredKey, Item>>,
    changes: Vec<ChangeRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_writes: RwLock<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a service error.
    pub async fn set_fail_writes(&self, message: Option<&str>) {
        *self.fail_writes.write().await = message.map(str::to_string);
    }

    /// Take every change recorded since the last drain, oldest first.
    pub async fn drain_changes(&self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.inner.write().await.changes)
    }

    /// Every item of a table in key order.
    pub async fn items(&self, table: &str) -> Vec<Item> {
        self.inner
            .read()
            .await
            .tables
            .get(table)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn check_writable(&self) -> Result<()> {
        match self.fail_writes.read().await.as_ref() {
            Some(message) => Err(StoreError::Service(message.clone())),
            None => Ok(()),
        }
    }
}

fn stored_key(key: &Item) -> Result<StoredKey> {
    let part = |name: &str, required: bool| -> Result<String> {
        match key.get(name) {
            Some(value) => value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| StoreError::Validation(format!("key attribute '{}' must be a string", name))),
            None if required => Err(StoreError::Validation(format!(
                "key attribute '{}' is missing",
                name
            ))),
            None => Ok(String::new()),
        }
    };
    Ok((
        part(PARTITION_KEY_COLUMN, true)?,
        part(SORT_KEY_COLUMN, false)?,
    ))
}

fn record_change(
    inner: &mut Inner,
    table: &str,
    event_type: EventType,
    key: &Item,
    old_image: Option<Item>,
    new_image: Option<Item>,
) {
    inner.changes.push(ChangeRecord {
        event_id: Uuid::new_v4().to_string(),
        table: table.to_string(),
        event_type,
        keys: key.clone(),
        new_image,
        old_image,
    });
}

/// Key attributes identifying an item's position in a query.
fn position_key(item: &Item, index: Option<&IndexKeys>) -> Item {
    let mut names = vec![PARTITION_KEY_COLUMN, SORT_KEY_COLUMN];
    if let Some(index) = index {
        names.push(&index.partition_attribute);
        if let Some(sort) = &index.sort_attribute {
            names.push(sort);
        }
    }
    names
        .into_iter()
        .filter_map(|name| item.get(name).map(|v| (name.to_string(), v.clone())))
        .collect()
}

/// Query order: the sort attribute, then the item's (pk, sk).
fn compare_position(a: &Item, b: &Item, sort_attribute: Option<&str>) -> Ordering {
    let by_sort = sort_attribute
        .and_then(|sort| match (a.get(sort), b.get(sort)) {
            (Some(a), Some(b)) => a.compare(b),
            _ => None,
        })
        .unwrap_or(Ordering::Equal);
    by_sort.then_with(|| stored_key(a).ok().cmp(&stored_key(b).ok()))
}

fn project(item: &Item, index: &IndexKeys) -> Item {
    match &index.projection {
        Projection::All => item.clone(),
        Projection::KeysOnly => position_key(item, Some(index)),
        Projection::Include(attributes) => {
            let mut projected = position_key(item, Some(index));
            for attribute in attributes {
                if let Some(value) = item.get(attribute) {
                    projected.insert(attribute.clone(), value.clone());
                }
            }
            projected
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn update_item(&self, request: UpdateItemRequest) -> Result<Item> {
        self.check_writable().await?;
        let key = stored_key(&request.key)?;
        if let Some(action) = request
            .update
            .actions()
            .iter()
            .find(|a| request.key.contains_key(&a.attribute))
        {
            return Err(StoreError::Validation(format!(
                "cannot update key attribute '{}'",
                action.attribute
            )));
        }

        let mut inner = self.inner.write().await;
        let current = inner
            .tables
            .get(&request.table)
            .and_then(|items| items.get(&key))
            .cloned();

        if let Some(condition) = &request.condition {
            if !condition.evaluate(current.as_ref()) {
                return Err(StoreError::ConditionalCheckFailed);
            }
        }

        let mut updated = current.clone().unwrap_or_else(|| request.key.clone());
        request.update.apply(&mut updated)?;

        inner
            .tables
            .entry(request.table.clone())
            .or_default()
            .insert(key, updated.clone());

        let event_type = if current.is_some() {
            EventType::Modify
        } else {
            EventType::Insert
        };
        record_change(
            &mut inner,
            &request.table,
            event_type,
            &request.key,
            current,
            Some(updated.clone()),
        );
        debug!(table = %request.table, event = %event_type, "Memory store write");
        Ok(updated)
    }

    async fn get_item(&self, request: GetItemRequest) -> Result<Option<Item>> {
        let key = stored_key(&request.key)?;
        Ok(self
            .inner
            .read()
            .await
            .tables
            .get(&request.table)
            .and_then(|items| items.get(&key))
            .cloned())
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> Result<Option<Item>> {
        self.check_writable().await?;
        let key = stored_key(&request.key)?;

        let mut inner = self.inner.write().await;
        let current = inner
            .tables
            .get(&request.table)
            .and_then(|items| items.get(&key))
            .cloned();

        if let Some(condition) = &request.condition {
            if !condition.evaluate(current.as_ref()) {
                return Err(StoreError::ConditionalCheckFailed);
            }
        }

        if current.is_some() {
            if let Some(items) = inner.tables.get_mut(&request.table) {
                items.remove(&key);
            }
            record_change(
                &mut inner,
                &request.table,
                EventType::Remove,
                &request.key,
                current.clone(),
                None,
            );
        }
        Ok(current)
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryOutput> {
        let inner = self.inner.read().await;
        let Some(items) = inner.tables.get(&request.table) else {
            return Ok(QueryOutput::default());
        };

        let index = request.index.as_ref();
        let mut candidates: Vec<&Item> = items
            .values()
            .filter(|item| request.key_condition.matches(item))
            .filter(|item| {
                // Items without the index sort attribute are not in the index.
                index
                    .and_then(|i| i.sort_attribute.as_ref())
                    .map(|sort| item.contains_key(sort))
                    .unwrap_or(true)
            })
            .collect();

        let sort_attribute = match index {
            Some(index) => index.sort_attribute.as_deref(),
            None => Some(SORT_KEY_COLUMN),
        };
        candidates.sort_by(|a, b| compare_position(a, b, sort_attribute));
        if !request.scan_forward {
            candidates.reverse();
        }

        // The start item may be gone; resume after its position, not at it.
        if let Some(start) = &request.exclusive_start_key {
            stored_key(start)?;
            let after = if request.scan_forward {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            candidates.retain(|item| compare_position(item, start, sort_attribute) == after);
        }

        let limit = request.limit.unwrap_or(usize::MAX);
        let has_more = candidates.len() > limit;
        candidates.truncate(limit);

        let last_evaluated_key = if has_more {
            candidates.last().map(|item| position_key(item, index))
        } else {
            None
        };

        // Filters see only the projected attributes.
        let items = candidates
            .into_iter()
            .map(|item| match index {
                Some(index) => project(item, index),
                None => item.clone(),
            })
            .filter(|item| {
                request
                    .filter
                    .as_ref()
                    .map(|f| f.evaluate(Some(item)))
                    .unwrap_or(true)
            })
            .collect();

        Ok(QueryOutput {
            items,
            last_evaluated_key,
        })
    }
}
