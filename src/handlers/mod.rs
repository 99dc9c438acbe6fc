//! Change-capture handlers.
//!
//! Four handler contracts, one per change-capture kind:
//!
//! - [`Enricher`]: keeps one related target record in sync with its source
//! - [`Reducer`]: recomputes an aggregate target from every source in its group
//! - [`MultiReducer`]: a reducer whose source may move between groups, so
//!   both the old and the new group are recomputed
//! - [`Reactor`]: arbitrary side effects
//!
//! The host implements the contracts and registers them by handler name in a
//! [`HandlerSet`]; [`HandlerSet::bind`] pairs each change-capture declaration
//! of the IR with its implementation and wraps it in a driver implementing
//! [`ChangeHandler`]. Drivers never apply deltas: every invocation re-derives
//! its writes from current store state, so redelivery and reordering are
//! harmless.

mod enricher;
mod error;
mod multi_reducer;
mod reactor;
mod reducer;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

pub use enricher::{Enricher, EnricherDriver};
pub use error::{HandlerError, Result};
pub use multi_reducer::{group_of, split_buckets, Buckets, MultiReducer, MultiReducerDriver};
pub use reactor::{Reactor, ReactorDriver};
pub use reducer::{Reducer, ReducerDriver};

use crate::codec::Record;
use crate::config::RetryConfig;
use crate::ir::{builtin, CdcKind, Ir};
use crate::repository::{Entity, Repository, RepositoryRegistry};
use crate::stream::{ChangeRecord, EventType};

/// What every handler invocation can reach.
#[derive(Clone)]
pub struct HandlerContext {
    registry: RepositoryRegistry,
    retry: RetryConfig,
}

impl HandlerContext {
    pub fn new(registry: RepositoryRegistry, retry: RetryConfig) -> Self {
        Self { registry, retry }
    }

    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Repository of a type.
    pub fn repository(&self, type_name: &str) -> Result<Arc<Repository>> {
        Ok(self.registry.get(type_name)?)
    }
}

/// A change record decoded against its source model.
#[derive(Debug, Clone)]
pub struct SourceChange {
    pub event_id: String,
    pub event_type: EventType,
    /// The new image, or the old image of a removed record.
    pub current: Entity,
    /// The old image of a modified record.
    pub previous: Option<Entity>,
}

impl SourceChange {
    pub fn from_record(registry: &RepositoryRegistry, record: &ChangeRecord) -> Result<Self> {
        let missing = || HandlerError::MissingImage {
            event_id: record.event_id.clone(),
        };
        let entity_type = record.entity_type().ok_or_else(missing)?;
        let repository = registry.get(entity_type)?;
        let image = record.image().ok_or_else(missing)?;
        let current = repository.entity(image)?;
        let previous = match record.event_type {
            EventType::Remove => None,
            _ => record
                .old_image
                .as_ref()
                .map(|old| repository.entity(old))
                .transpose()?,
        };
        Ok(Self {
            event_id: record.event_id.clone(),
            event_type: record.event_type,
            current,
            previous,
        })
    }

    pub fn is_remove(&self) -> bool {
        self.event_type == EventType::Remove
    }
}

/// Type-erased handler bound to one change-capture declaration.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    /// `{source}:{handler}`.
    fn handler_id(&self) -> &str;

    async fn handle(&self, ctx: &HandlerContext, change: &SourceChange) -> Result<()>;
}

/// Host implementations by handler name.
#[derive(Default, Clone)]
pub struct HandlerSet {
    enrichers: HashMap<String, Arc<dyn Enricher>>,
    reducers: HashMap<String, Arc<dyn Reducer>>,
    multi_reducers: HashMap<String, Arc<dyn MultiReducer>>,
    reactors: HashMap<String, Arc<dyn Reactor>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enricher(mut self, name: impl Into<String>, enricher: impl Enricher + 'static) -> Self {
        self.enrichers.insert(name.into(), Arc::new(enricher));
        self
    }

    pub fn with_reducer(mut self, name: impl Into<String>, reducer: impl Reducer + 'static) -> Self {
        self.reducers.insert(name.into(), Arc::new(reducer));
        self
    }

    pub fn with_multi_reducer(
        mut self,
        name: impl Into<String>,
        reducer: impl MultiReducer + 'static,
    ) -> Self {
        self.multi_reducers.insert(name.into(), Arc::new(reducer));
        self
    }

    pub fn with_reactor(mut self, name: impl Into<String>, reactor: impl Reactor + 'static) -> Self {
        self.reactors.insert(name.into(), Arc::new(reactor));
        self
    }

    /// One driver per change-capture declaration, keyed by handler id.
    ///
    /// Fails when a declaration has no implementation of the matching kind.
    pub fn bind(&self, ir: &Ir) -> Result<HashMap<String, Arc<dyn ChangeHandler>>> {
        let mut bound: HashMap<String, Arc<dyn ChangeHandler>> = HashMap::new();
        for config in ir.change_data_capture() {
            let unregistered = || HandlerError::UnregisteredHandler {
                handler: config.handler.clone(),
                kind: config.kind_name().to_string(),
            };
            let handler_id = config.handler_id();
            let driver: Arc<dyn ChangeHandler> = match &config.kind {
                CdcKind::Enricher { target_model_name } => Arc::new(EnricherDriver::new(
                    handler_id.clone(),
                    target_model_name.clone(),
                    self.enrichers.get(&config.handler).cloned().ok_or_else(unregistered)?,
                )),
                CdcKind::Reducer {
                    target_model_name,
                    multi: false,
                } => Arc::new(ReducerDriver::new(
                    handler_id.clone(),
                    target_model_name.clone(),
                    self.reducers.get(&config.handler).cloned().ok_or_else(unregistered)?,
                )),
                CdcKind::Reducer {
                    target_model_name,
                    multi: true,
                } => Arc::new(MultiReducerDriver::new(
                    handler_id.clone(),
                    target_model_name.clone(),
                    self.multi_reducers
                        .get(&config.handler)
                        .cloned()
                        .ok_or_else(unregistered)?,
                )),
                CdcKind::Trigger => Arc::new(ReactorDriver::new(
                    handler_id.clone(),
                    self.reactors.get(&config.handler).cloned().ok_or_else(unregistered)?,
                )),
            };
            debug!(handler = %handler_id, kind = config.kind_name(), "Bound change handler");
            bound.insert(handler_id, driver);
        }
        Ok(bound)
    }
}

/// Outcome of writing a recomputed or enriched target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    /// The stored record already holds these values.
    Unchanged,
    /// The handler declined to write.
    Skipped,
}

/// Create the target, or update it at its current version when any input
/// value differs from what is stored.
pub(crate) async fn write_target(
    repository: &Repository,
    key: &Record,
    input: Record,
) -> Result<WriteOutcome> {
    match repository.find(key).await? {
        None => {
            repository.create(&input).await?;
            Ok(WriteOutcome::Created)
        }
        Some(existing) if is_unchanged(&existing, &input) => Ok(WriteOutcome::Unchanged),
        Some(existing) => update_at_version(repository, &existing, input).await,
    }
}

/// Update `existing`, conditional on the version it was read at.
pub(crate) async fn update_at_version(
    repository: &Repository,
    existing: &Entity,
    mut input: Record,
) -> Result<WriteOutcome> {
    input.insert(builtin::VERSION.to_string(), json!(existing.version()));
    repository.update(&input).await?;
    Ok(WriteOutcome::Updated)
}

pub(crate) fn is_unchanged(existing: &Entity, input: &Record) -> bool {
    input
        .iter()
        .filter(|(name, _)| {
            !matches!(
                name.as_str(),
                builtin::ID | builtin::VERSION | builtin::CREATED_AT | builtin::UPDATED_AT
            )
        })
        .all(|(name, value)| match existing.record().get(name) {
            Some(stored) => stored == value,
            None => value.is_null(),
        })
}
