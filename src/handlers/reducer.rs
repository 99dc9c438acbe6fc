//! Aggregate target recomputed from every source in its group.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use tracing::{debug, warn};

use super::{
    write_target, ChangeHandler, HandlerContext, HandlerError, Result, SourceChange, WriteOutcome,
};
use crate::codec::Record;
use crate::repository::{Entity, QueryInput, QueryOptions};
use crate::utils::retry::conflict_backoff;

/// Contract of a reducing handler.
///
/// On every change the driver re-queries all sources in the changed
/// source's group and hands them to [`reduce`](Reducer::reduce), so the
/// aggregate converges no matter how often or in which order changes
/// arrive. A removed source is simply absent from the re-query.
#[async_trait]
pub trait Reducer: Send + Sync {
    /// Query over the source model selecting the group of `source`.
    fn source_query(&self, source: &Entity) -> Result<QueryInput>;

    /// Primary-key fields of the aggregate `source` contributes to.
    fn target_key(&self, source: &Entity) -> Record;

    /// Full target input computed from the group, or `None` to skip.
    async fn reduce(
        &self,
        ctx: &HandlerContext,
        source: &Entity,
        sources: &[Entity],
    ) -> Result<Option<Record>>;
}

pub struct ReducerDriver {
    handler_id: String,
    target: String,
    reducer: Arc<dyn Reducer>,
}

impl ReducerDriver {
    pub fn new(handler_id: String, target: String, reducer: Arc<dyn Reducer>) -> Self {
        Self {
            handler_id,
            target,
            reducer,
        }
    }

    async fn recompute(&self, ctx: &HandlerContext, source: &Entity) -> Result<WriteOutcome> {
        let sources_repository = ctx.repository(&source.model().type_name)?;
        let query = self.reducer.source_query(source)?;
        let sources = sources_repository
            .query_all(&query, &QueryOptions::default())
            .await?;

        let Some(input) = self.reducer.reduce(ctx, source, &sources).await? else {
            return Ok(WriteOutcome::Skipped);
        };
        let repository = ctx.repository(&self.target)?;
        write_target(&repository, &self.reducer.target_key(source), input).await
    }
}

#[async_trait]
impl ChangeHandler for ReducerDriver {
    fn handler_id(&self) -> &str {
        &self.handler_id
    }

    async fn handle(&self, ctx: &HandlerContext, change: &SourceChange) -> Result<()> {
        let source = &change.current;
        let outcome = (move || async move { self.recompute(ctx, source).await })
            .retry(conflict_backoff(ctx.retry()))
            .when(HandlerError::is_conflict)
            .notify(|err: &HandlerError, dur: Duration| {
                warn!(handler = %self.handler_id, error = %err, delay = ?dur, "Reduce conflict, retrying");
            })
            .await?;

        debug!(
            handler = %self.handler_id,
            target = %self.target,
            source = %source.id(),
            outcome = ?outcome,
            "Reduced"
        );
        Ok(())
    }
}
