//! Dead Letter Queue (DLQ) infrastructure.
//!
//! Change records whose handler keeps failing are taken off the handler's
//! queue once they reach the queue's receive limit and handed to a
//! [`DeadLetterPublisher`] for manual review and replay.
//!
//! ## Topic Naming
//!
//! DLQ topics follow the pattern: `dynaforge.dlq.{handler_id}`, where the
//! handler id is `{source}:{handler}`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::stream::ChangeRecord;

/// DLQ topic prefix. Full topic: `{prefix}.{handler_id}`
pub const DLQ_TOPIC_PREFIX: &str = "dynaforge.dlq";

/// Build the DLQ topic name for a handler.
pub fn dlq_topic_for_handler(handler_id: &str) -> String {
    format!("{}.{}", DLQ_TOPIC_PREFIX, handler_id)
}

/// Errors that can occur during DLQ operations.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("Failed to serialize message: {0}")]
    Serialization(String),

    #[error("Failed to publish to DLQ: {0}")]
    PublishFailed(String),
}

/// Dead letter queue entry for one change record and one handler.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Handler that gave up on the record.
    pub handler_id: String,
    /// The undeliverable change record.
    pub record: ChangeRecord,
    /// Last handler error.
    pub reason: String,
    /// Deliveries attempted before giving up.
    pub receive_count: u32,
    pub occurred_at: DateTime<Utc>,
    /// Additional context.
    pub metadata: HashMap<String, String>,
}

impl DeadLetter {
    /// Create a dead letter for a record that exhausted its deliveries.
    pub fn from_exhausted_retries(
        handler_id: &str,
        record: ChangeRecord,
        reason: &str,
        receive_count: u32,
    ) -> Self {
        Self {
            handler_id: handler_id.to_string(),
            record,
            reason: format!(
                "Handler failed after {} deliveries: {}",
                receive_count, reason
            ),
            receive_count,
            occurred_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the dead letter.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Get the DLQ topic for this dead letter.
    pub fn topic(&self) -> String {
        dlq_topic_for_handler(&self.handler_id)
    }

    /// JSON form for transports that carry text.
    pub fn to_json(&self) -> Result<String, DlqError> {
        let body = serde_json::json!({
            "handlerId": self.handler_id,
            "record": self.record,
            "reason": self.reason,
            "receiveCount": self.receive_count,
            "occurredAt": self.occurred_at.to_rfc3339(),
            "metadata": self.metadata,
        });
        serde_json::to_string(&body).map_err(|e| DlqError::Serialization(e.to_string()))
    }
}

/// Trait for publishing messages to a dead letter queue.
///
/// Implementations handle the actual transport.
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    /// Publish a dead letter to the queue.
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError>;

    /// Check if the publisher is configured and ready.
    fn is_configured(&self) -> bool {
        true
    }
}

/// No-op DLQ publisher that logs but doesn't actually send anywhere.
pub struct NoopDeadLetterPublisher;

#[async_trait]
impl DeadLetterPublisher for NoopDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        warn!(
            topic = %dead_letter.topic(),
            reason = %dead_letter.reason,
            event_id = %dead_letter.record.event_id,
            "DLQ not configured, logging dead letter"
        );
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// In-memory DLQ publisher using a channel.
pub struct ChannelDeadLetterPublisher {
    sender: mpsc::UnboundedSender<DeadLetter>,
}

impl ChannelDeadLetterPublisher {
    /// Create a new channel-based DLQ publisher.
    ///
    /// Returns the publisher and a receiver for consuming dead letters.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeadLetter>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterPublisher for ChannelDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        error!(
            topic = %dead_letter.topic(),
            reason = %dead_letter.reason,
            event_id = %dead_letter.record.event_id,
            "Dead-lettered change record"
        );
        self.sender
            .send(dead_letter)
            .map_err(|e| DlqError::PublishFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AttributeValue, Item};
    use crate::stream::EventType;

    fn make_record() -> ChangeRecord {
        let keys = Item::from([("pk".to_string(), AttributeValue::string("ACCOUNT#a-1"))]);
        ChangeRecord {
            event_id: "evt-1".to_string(),
            table: "Subscriptions".to_string(),
            event_type: EventType::Insert,
            keys: keys.clone(),
            new_image: Some(keys),
            old_image: None,
        }
    }

    #[test]
    fn test_dlq_topic_for_handler() {
        assert_eq!(
            dlq_topic_for_handler("Account:accountAudit"),
            "dynaforge.dlq.Account:accountAudit"
        );
    }

    #[test]
    fn test_from_exhausted_retries() {
        let dl = DeadLetter::from_exhausted_retries("Account:accountAudit", make_record(), "boom", 5)
            .with_metadata("table", "Subscriptions");

        assert_eq!(dl.topic(), "dynaforge.dlq.Account:accountAudit");
        assert!(dl.reason.contains("5 deliveries"));
        assert!(dl.reason.contains("boom"));
        assert_eq!(dl.receive_count, 5);
        assert_eq!(dl.metadata.get("table"), Some(&"Subscriptions".to_string()));
    }

    #[test]
    fn test_to_json_carries_record() {
        let dl = DeadLetter::from_exhausted_retries("Account:accountAudit", make_record(), "boom", 2);
        let json: serde_json::Value = serde_json::from_str(&dl.to_json().unwrap()).unwrap();
        assert_eq!(json["handlerId"], "Account:accountAudit");
        assert_eq!(json["record"]["eventId"], "evt-1");
        assert_eq!(json["receiveCount"], 2);
    }

    #[tokio::test]
    async fn test_noop_publisher_succeeds() {
        let publisher = NoopDeadLetterPublisher;
        assert!(!publisher.is_configured());
        let dl = DeadLetter::from_exhausted_retries("h", make_record(), "boom", 1);
        assert!(publisher.publish(dl).await.is_ok());
    }

    #[tokio::test]
    async fn test_channel_publisher_delivers() {
        let (publisher, mut receiver) = ChannelDeadLetterPublisher::new();
        assert!(publisher.is_configured());

        let dl = DeadLetter::from_exhausted_retries("h", make_record(), "boom", 1);
        publisher.publish(dl).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.handler_id, "h");
        assert_eq!(received.record.event_id, "evt-1");
    }
}
