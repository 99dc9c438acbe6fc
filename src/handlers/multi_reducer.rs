//! Reducer whose source can move between groups.
//!
//! When a change moves a source from one group to another, both aggregates
//! are stale: the old one still counts the source, the new one does not.
//! The driver fetches every candidate of either group in one query, narrowed
//! by key condition on the fields both groups share and by a filter
//! `(previous) OR (current)`, then splits the candidates by group and
//! recomputes each aggregate from its own bucket.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    write_target, ChangeHandler, HandlerContext, HandlerError, Result, SourceChange, WriteOutcome,
};
use crate::codec::{Codec, CodecError, Record};
use crate::key::KeyError;
use crate::repository::{Entity, QueryInput, QueryOptions, Repository, RepositoryError};
use crate::storage::{AttributeValue, Condition};
use crate::utils::retry::conflict_backoff;

/// Contract of a multi-group reducing handler.
#[async_trait]
pub trait MultiReducer: Send + Sync {
    /// Source fields whose values select the target group, in key order.
    fn group_fields(&self) -> Vec<String>;

    /// Query over the source model for every source agreeing with `group`
    /// on the fields it holds. `group` may hold any subset of the group
    /// fields.
    fn source_query(&self, group: &Record) -> Result<QueryInput>;

    /// Primary-key fields of the aggregate of a complete group.
    fn target_key(&self, group: &Record) -> Record;

    /// Full target input computed from the group's sources, or `None` to
    /// skip.
    async fn reduce(
        &self,
        ctx: &HandlerContext,
        group: &Record,
        sources: &[Entity],
    ) -> Result<Option<Record>>;
}

/// Candidates split by group.
#[derive(Debug, Default)]
pub struct Buckets {
    pub current: Vec<Entity>,
    pub previous: Vec<Entity>,
}

/// Values of the group fields of an entity; absent fields are null.
pub fn group_of(entity: &Entity, fields: &[String]) -> Record {
    fields
        .iter()
        .map(|name| {
            let value = entity.record().get(name).cloned().unwrap_or(Value::Null);
            (name.clone(), value)
        })
        .collect()
}

/// Assign every candidate to the current or the previous group.
///
/// A candidate in neither group means the query was wider than the two
/// groups; it is an error rather than a silent miscount.
pub fn split_buckets(
    handler_id: &str,
    fields: &[String],
    current: &Record,
    previous: Option<&Record>,
    candidates: Vec<Entity>,
) -> Result<Buckets> {
    let mut buckets = Buckets::default();
    for candidate in candidates {
        let group = group_of(&candidate, fields);
        if &group == current {
            buckets.current.push(candidate);
        } else if previous == Some(&group) {
            buckets.previous.push(candidate);
        } else {
            return Err(HandlerError::BucketMismatch {
                handler: handler_id.to_string(),
                source_id: candidate.id().to_string(),
            });
        }
    }
    Ok(buckets)
}

pub struct MultiReducerDriver {
    handler_id: String,
    target: String,
    reducer: Arc<dyn MultiReducer>,
}

#[derive(Debug)]
struct Recomputed {
    current: WriteOutcome,
    previous: Option<WriteOutcome>,
}

impl MultiReducerDriver {
    pub fn new(handler_id: String, target: String, reducer: Arc<dyn MultiReducer>) -> Self {
        Self {
            handler_id,
            target,
            reducer,
        }
    }

    async fn recompute(&self, ctx: &HandlerContext, change: &SourceChange) -> Result<Recomputed> {
        let fields = self.reducer.group_fields();
        let current = group_of(&change.current, &fields);
        let previous = change
            .previous
            .as_ref()
            .map(|p| group_of(p, &fields))
            .filter(|p| *p != current);

        let sources = ctx.repository(&change.current.model().type_name)?;
        let candidates = self
            .candidates(&sources, &current, previous.as_ref())
            .await?;
        let buckets = split_buckets(
            &self.handler_id,
            &fields,
            &current,
            previous.as_ref(),
            candidates,
        )?;

        let targets = ctx.repository(&self.target)?;
        let current_outcome = self
            .write_group(ctx, &targets, &current, &buckets.current)
            .await?;
        let previous_outcome = match &previous {
            Some(group) => Some(
                self.write_group(ctx, &targets, group, &buckets.previous)
                    .await?,
            ),
            None => None,
        };
        Ok(Recomputed {
            current: current_outcome,
            previous: previous_outcome,
        })
    }

    async fn candidates(
        &self,
        sources: &Repository,
        current: &Record,
        previous: Option<&Record>,
    ) -> Result<Vec<Entity>> {
        let codec = sources.codec();
        let mut filter = group_condition(codec, current)?;
        let mut common = current.clone();
        if let Some(previous) = previous {
            filter = Condition::Or(vec![filter, group_condition(codec, previous)?]);
            common.retain(|name, value| previous.get(name) == Some(value));
        }
        let options = QueryOptions {
            filter: Some(filter),
            ..QueryOptions::default()
        };

        match sources
            .query_all(&self.reducer.source_query(&common)?, &options)
            .await
        {
            Ok(found) => Ok(found),
            Err(e) if is_missing_key(&e) => {
                let Some(previous) = previous else {
                    return Err(e.into());
                };
                debug!(
                    handler = %self.handler_id,
                    "Groups share no queryable key, querying each"
                );
                let mut found = sources
                    .query_all(&self.reducer.source_query(current)?, &options)
                    .await?;
                let mut seen: HashSet<String> = found.iter().map(|e| e.id().to_string()).collect();
                for entity in sources
                    .query_all(&self.reducer.source_query(previous)?, &options)
                    .await?
                {
                    if seen.insert(entity.id().to_string()) {
                        found.push(entity);
                    }
                }
                Ok(found)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_group(
        &self,
        ctx: &HandlerContext,
        targets: &Repository,
        group: &Record,
        sources: &[Entity],
    ) -> Result<WriteOutcome> {
        match self.reducer.reduce(ctx, group, sources).await? {
            Some(input) => write_target(targets, &self.reducer.target_key(group), input).await,
            None => Ok(WriteOutcome::Skipped),
        }
    }
}

#[async_trait]
impl ChangeHandler for MultiReducerDriver {
    fn handler_id(&self) -> &str {
        &self.handler_id
    }

    async fn handle(&self, ctx: &HandlerContext, change: &SourceChange) -> Result<()> {
        let outcome = (move || async move { self.recompute(ctx, change).await })
            .retry(conflict_backoff(ctx.retry()))
            .when(HandlerError::is_conflict)
            .notify(|err: &HandlerError, dur: Duration| {
                warn!(handler = %self.handler_id, error = %err, delay = ?dur, "Reduce conflict, retrying");
            })
            .await?;

        debug!(
            handler = %self.handler_id,
            target = %self.target,
            source = %change.current.id(),
            current = ?outcome.current,
            previous = ?outcome.previous,
            "Reduced groups"
        );
        Ok(())
    }
}

/// Filter matching every source of a group.
fn group_condition(codec: &Codec, group: &Record) -> Result<Condition> {
    let mut conditions = Vec::with_capacity(group.len());
    for (name, value) in group {
        let field = codec.model().field(name).ok_or_else(|| {
            HandlerError::Failed(format!(
                "{} has no group field '{}'",
                codec.model().type_name,
                name
            ))
        })?;
        let column = field.column_name.clone();
        if value.is_null() {
            conditions.push(Condition::Or(vec![
                Condition::NotExists(column.clone()),
                Condition::equals(column, AttributeValue::null()),
            ]));
        } else {
            conditions.push(Condition::equals(column, codec.encode_value(field, value)?));
        }
    }
    Ok(Condition::And(conditions))
}

fn is_missing_key(error: &RepositoryError) -> bool {
    matches!(
        error,
        RepositoryError::InvalidInput(CodecError::Key(KeyError::MissingField(_)))
    )
}
