//! Handler queues between the change stream and the handlers.
//!
//! This module contains:
//! - `HandlerQueue` trait: one logical queue per change-capture handler
//! - `QueueMessage`: a change record addressed to one handler
//! - `Dispatcher`: classifies change records and enqueues one message per
//!   matching (handler, record)
//! - Implementations: in-memory channel queue

use std::sync::Arc;

use async_trait::async_trait;

use crate::dlq::DlqError;
use crate::stream::ChangeRecord;

pub mod channel;
mod dispatch;

pub use channel::ChannelQueue;
pub use dispatch::{Dispatcher, Route};

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Unknown message '{0}'")]
    UnknownMessage(String),

    #[error("Dead letter publish failed: {0}")]
    DeadLetter(#[from] DlqError),
}

/// One change record addressed to one handler.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: String,
    pub handler_id: String,
    /// Shared between every handler the record was routed to.
    pub record: Arc<ChangeRecord>,
    /// Deliveries so far, including this one.
    pub receive_count: u32,
}

/// Queue of change records per handler, with at-least-once delivery.
///
/// A received message stays invisible until it is acknowledged or its
/// visibility timeout passes; failed messages come back until the queue
/// gives up on them and dead-letters them.
#[async_trait]
pub trait HandlerQueue: Send + Sync {
    /// Enqueue a record for one handler.
    async fn send(&self, handler_id: &str, record: Arc<ChangeRecord>) -> Result<()>;

    /// Take up to `max` visible messages for a handler.
    async fn receive(&self, handler_id: &str, max: usize) -> Result<Vec<QueueMessage>>;

    /// The message was handled; remove it.
    async fn ack(&self, message: &QueueMessage) -> Result<()>;

    /// The handler failed; redeliver later or dead-letter.
    async fn nack(&self, message: &QueueMessage, reason: &str) -> Result<()>;

    /// Messages not yet acknowledged, visible or not.
    async fn pending(&self) -> usize;

    /// Messages receivable right now.
    async fn visible(&self) -> usize;
}
