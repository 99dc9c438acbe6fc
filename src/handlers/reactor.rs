//! Arbitrary side effects of a change.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ChangeHandler, HandlerContext, Result, SourceChange};

/// Contract of a reacting handler: no declared target, no retries by the
/// driver. Failures surface as a failed delivery.
#[async_trait]
pub trait Reactor: Send + Sync {
    async fn react(&self, ctx: &HandlerContext, change: &SourceChange) -> Result<()>;
}

pub struct ReactorDriver {
    handler_id: String,
    reactor: Arc<dyn Reactor>,
}

impl ReactorDriver {
    pub fn new(handler_id: String, reactor: Arc<dyn Reactor>) -> Self {
        Self { handler_id, reactor }
    }
}

#[async_trait]
impl ChangeHandler for ReactorDriver {
    fn handler_id(&self) -> &str {
        &self.handler_id
    }

    async fn handle(&self, ctx: &HandlerContext, change: &SourceChange) -> Result<()> {
        self.reactor.react(ctx, change).await?;
        debug!(handler = %self.handler_id, source = %change.current.id(), "Reacted");
        Ok(())
    }
}
