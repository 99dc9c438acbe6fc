//! One source record keeps one related target record in sync.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use tracing::{debug, warn};

use super::{
    is_unchanged, update_at_version, ChangeHandler, HandlerContext, HandlerError, Result,
    SourceChange, WriteOutcome,
};
use crate::codec::Record;
use crate::repository::Entity;
use crate::utils::retry::conflict_backoff;

/// Contract of an enriching handler.
///
/// The driver loads the target by [`target_key`](Enricher::target_key) and
/// calls [`create`](Enricher::create) when it is absent or
/// [`update`](Enricher::update) when it exists. Either may return `None`
/// to leave the target as it is, e.g. for an event older than the target.
/// An update whose values all match the stored target is not written.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Primary-key fields of the target this source enriches.
    fn target_key(&self, source: &Entity) -> Record;

    /// Input for a new target.
    async fn create(&self, ctx: &HandlerContext, source: &Entity) -> Result<Option<Record>>;

    /// Input for the existing target. The driver supplies the version.
    async fn update(
        &self,
        ctx: &HandlerContext,
        source: &Entity,
        target: &Entity,
    ) -> Result<Option<Record>>;
}

pub struct EnricherDriver {
    handler_id: String,
    target: String,
    enricher: Arc<dyn Enricher>,
}

impl EnricherDriver {
    pub fn new(handler_id: String, target: String, enricher: Arc<dyn Enricher>) -> Self {
        Self {
            handler_id,
            target,
            enricher,
        }
    }

    async fn enrich(&self, ctx: &HandlerContext, source: &Entity) -> Result<WriteOutcome> {
        let repository = ctx.repository(&self.target)?;
        let key = self.enricher.target_key(source);

        match repository.find(&key).await? {
            None => match self.enricher.create(ctx, source).await? {
                Some(input) => {
                    repository.create(&input).await?;
                    Ok(WriteOutcome::Created)
                }
                None => Ok(WriteOutcome::Skipped),
            },
            Some(target) => match self.enricher.update(ctx, source, &target).await? {
                Some(input) if is_unchanged(&target, &input) => Ok(WriteOutcome::Unchanged),
                Some(input) => update_at_version(&repository, &target, input).await,
                None => Ok(WriteOutcome::Skipped),
            },
        }
    }
}

#[async_trait]
impl ChangeHandler for EnricherDriver {
    fn handler_id(&self) -> &str {
        &self.handler_id
    }

    async fn handle(&self, ctx: &HandlerContext, change: &SourceChange) -> Result<()> {
        let source = &change.current;
        let outcome = (move || async move { self.enrich(ctx, source).await })
            .retry(conflict_backoff(ctx.retry()))
            .when(HandlerError::is_conflict)
            .notify(|err: &HandlerError, dur: Duration| {
                warn!(handler = %self.handler_id, error = %err, delay = ?dur, "Enrich conflict, retrying");
            })
            .await?;

        debug!(
            handler = %self.handler_id,
            target = %self.target,
            source = %source.id(),
            outcome = ?outcome,
            "Enriched"
        );
        Ok(())
    }
}
