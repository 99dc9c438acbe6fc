//! Change-propagation runtime.
//!
//! Wires the pieces together: change records enter through
//! [`ChangeRuntime::process_stream_batch`], the dispatcher enqueues one
//! message per matching handler, and [`ChangeRuntime::consume`] drains a
//! handler's queue with per-record isolation: a failing record is nacked
//! for redelivery while the rest of its batch is acknowledged.
//!
//! [`ChangeRuntime::handle_batch`] is the inline alternative for hosts
//! without a queue: records run through their handlers directly and only
//! the failed ones are reported back.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::bus::{BusError, Dispatcher, HandlerQueue, QueueMessage};
use crate::config::Config;
use crate::handlers::{ChangeHandler, HandlerContext, HandlerError, HandlerSet, SourceChange};
use crate::repository::RepositoryRegistry;
use crate::storage::MemoryStore;
use crate::stream::{BatchResponse, ChangeRecord};

/// Rounds [`ChangeRuntime::run_until_idle`] runs before giving up.
const MAX_ROUNDS: usize = 1_000;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("Changes still propagating after {rounds} rounds")]
    Stalled { rounds: usize },
}

/// Counts of one or more queue drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    pub received: usize,
    pub handled: usize,
    pub failed: usize,
}

impl ConsumeStats {
    fn add(&mut self, other: ConsumeStats) {
        self.received += other.received;
        self.handled += other.handled;
        self.failed += other.failed;
    }
}

/// Counts of a [`ChangeRuntime::run_until_idle`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub rounds: usize,
    pub changes: usize,
    pub messages: ConsumeStats,
}

pub struct ChangeRuntime {
    context: HandlerContext,
    dispatcher: Dispatcher,
    queue: Arc<dyn HandlerQueue>,
    handlers: HashMap<String, Arc<dyn ChangeHandler>>,
    batch_size: usize,
}

impl ChangeRuntime {
    /// Bind every change-capture declaration of the registry's IR to its
    /// implementation in `handlers`.
    pub fn new(
        registry: RepositoryRegistry,
        handlers: &HandlerSet,
        queue: Arc<dyn HandlerQueue>,
        config: &Config,
    ) -> Result<Self> {
        let bound = handlers.bind(registry.ir())?;
        let dispatcher = Dispatcher::new(&registry, Arc::clone(&queue));
        info!(
            handlers = bound.len(),
            routes = dispatcher.routes().len(),
            "Change runtime initialized"
        );
        Ok(Self {
            context: HandlerContext::new(registry, config.retry.clone()),
            dispatcher,
            queue,
            handlers: bound,
            batch_size: config.queue.batch_size.max(1),
        })
    }

    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handler ids in a stable order.
    pub fn handler_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stream consumer entry point: enqueue every record for its handlers.
    pub async fn process_stream_batch(&self, records: Vec<ChangeRecord>) -> BatchResponse {
        self.dispatcher.dispatch_batch(records).await
    }

    /// Run every record through its handlers without a queue.
    ///
    /// A record is reported as failed when any of its handlers fails; the
    /// other records of the batch are unaffected.
    pub async fn handle_batch(&self, records: Vec<ChangeRecord>) -> BatchResponse {
        let mut response = BatchResponse::default();
        for record in records {
            let mut failed = false;
            for route in self.dispatcher.routes_for(&record) {
                if let Err(e) = self.handle_record(&route.handler_id, &record).await {
                    error!(
                        handler = %route.handler_id,
                        event_id = %record.event_id,
                        error = %e,
                        "Handler failed"
                    );
                    failed = true;
                }
            }
            if failed {
                response.fail(record.event_id.clone());
            }
        }
        response
    }

    /// Drain one batch of a handler's queue.
    pub async fn consume(&self, handler_id: &str) -> Result<ConsumeStats> {
        let messages = self.queue.receive(handler_id, self.batch_size).await?;
        let mut stats = ConsumeStats {
            received: messages.len(),
            ..ConsumeStats::default()
        };
        for message in messages {
            if self.handle_message(&message).await? {
                stats.handled += 1;
            } else {
                stats.failed += 1;
            }
        }
        Ok(stats)
    }

    /// One batch from every handler's queue.
    pub async fn consume_all(&self) -> Result<ConsumeStats> {
        let mut stats = ConsumeStats::default();
        for handler_id in self.handler_ids() {
            stats.add(self.consume(&handler_id).await?);
        }
        Ok(stats)
    }

    /// Feed the store's change stream through the runtime until no change
    /// is left and no message is visible.
    ///
    /// Messages waiting out a visibility timeout do not keep the run going.
    pub async fn run_until_idle(&self, store: &MemoryStore) -> Result<RunStats> {
        let mut stats = RunStats::default();
        while stats.rounds < MAX_ROUNDS {
            stats.rounds += 1;
            let changes = store.drain_changes().await;
            stats.changes += changes.len();
            let idle_stream = changes.is_empty();
            if !idle_stream {
                let response = self.process_stream_batch(changes).await;
                if !response.is_success() {
                    error!(
                        failures = response.batch_item_failures.len(),
                        "Failed to dispatch change records"
                    );
                }
            }

            let consumed = self.consume_all().await?;
            stats.messages.add(consumed);
            if idle_stream && consumed.received == 0 {
                debug!(rounds = stats.rounds, changes = stats.changes, "Runtime idle");
                return Ok(stats);
            }
        }
        Err(RuntimeError::Stalled { rounds: stats.rounds })
    }

    /// Handle one queued message; `false` when the handler failed and the
    /// message was nacked.
    async fn handle_message(&self, message: &QueueMessage) -> Result<bool> {
        match self.handle_record(&message.handler_id, &message.record).await {
            Ok(()) => {
                self.queue.ack(message).await?;
                Ok(true)
            }
            Err(e) => {
                error!(
                    handler = %message.handler_id,
                    event_id = %message.record.event_id,
                    receive_count = message.receive_count,
                    error = %e,
                    "Handler failed"
                );
                self.queue.nack(message, &e.to_string()).await?;
                Ok(false)
            }
        }
    }

    async fn handle_record(
        &self,
        handler_id: &str,
        record: &ChangeRecord,
    ) -> std::result::Result<(), HandlerError> {
        let handler = self.handlers.get(handler_id).ok_or_else(|| {
            HandlerError::Failed(format!("no handler bound for '{}'", handler_id))
        })?;
        let change = SourceChange::from_record(self.context.registry(), record)?;
        handler.handle(&self.context, &change).await
    }
}
