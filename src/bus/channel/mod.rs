//! In-memory handler queue.
//!
//! Per-handler FIFO queues behind one lock. Received messages move to an
//! in-flight set with a visibility deadline; a nack or an expired deadline
//! makes them receivable again, and the receive limit routes them to the
//! dead-letter publisher instead.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BusError, HandlerQueue, QueueMessage, Result};
use crate::config::QueueConfig;
use crate::dlq::{DeadLetter, DeadLetterPublisher, NoopDeadLetterPublisher};
use crate::stream::ChangeRecord;

struct Envelope {
    message: QueueMessage,
    visible_at: Instant,
}

#[derive(Default)]
struct Queues {
    ready: HashMap<String, VecDeque<Envelope>>,
    in_flight: HashMap<String, Envelope>,
}

impl Queues {
    /// Return expired in-flight messages of a handler to its queue.
    fn reclaim(&mut self, handler_id: &str, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, e)| e.message.handler_id == handler_id && e.visible_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(envelope) = self.in_flight.remove(&id) {
                debug!(message_id = %id, "Visibility timeout expired, redelivering");
                self.ready
                    .entry(envelope.message.handler_id.clone())
                    .or_default()
                    .push_back(envelope);
            }
        }
    }
}

/// In-memory queue with visibility timeouts and a receive limit.
pub struct ChannelQueue {
    queues: Mutex<Queues>,
    visibility_timeout: Duration,
    max_receive_count: u32,
    dead_letters: Arc<dyn DeadLetterPublisher>,
}

impl ChannelQueue {
    /// Create a queue that only logs dead letters.
    pub fn new(config: &QueueConfig) -> Self {
        Self::with_dead_letters(config, Arc::new(NoopDeadLetterPublisher))
    }

    pub fn with_dead_letters(config: &QueueConfig, dead_letters: Arc<dyn DeadLetterPublisher>) -> Self {
        info!(
            visibility_timeout_secs = config.visibility_timeout_secs,
            max_receive_count = config.max_receive_count,
            "Channel queue initialized"
        );
        Self {
            queues: Mutex::new(Queues::default()),
            visibility_timeout: config.visibility_timeout(),
            max_receive_count: config.max_receive_count.max(1),
            dead_letters,
        }
    }
}

#[async_trait]
impl HandlerQueue for ChannelQueue {
    async fn send(&self, handler_id: &str, record: Arc<ChangeRecord>) -> Result<()> {
        let message = QueueMessage {
            message_id: Uuid::new_v4().to_string(),
            handler_id: handler_id.to_string(),
            record,
            receive_count: 0,
        };
        debug!(
            handler = %handler_id,
            message_id = %message.message_id,
            event_id = %message.record.event_id,
            "Enqueued change record"
        );
        self.queues
            .lock()
            .await
            .ready
            .entry(handler_id.to_string())
            .or_default()
            .push_back(Envelope {
                message,
                visible_at: Instant::now(),
            });
        Ok(())
    }

    async fn receive(&self, handler_id: &str, max: usize) -> Result<Vec<QueueMessage>> {
        let now = Instant::now();
        let mut queues = self.queues.lock().await;
        queues.reclaim(handler_id, now);

        let mut received = Vec::new();
        let mut deferred = VecDeque::new();
        if let Some(ready) = queues.ready.get_mut(handler_id) {
            while received.len() < max {
                let Some(mut envelope) = ready.pop_front() else {
                    break;
                };
                if envelope.visible_at > now {
                    deferred.push_back(envelope);
                    continue;
                }
                envelope.message.receive_count += 1;
                envelope.visible_at = now + self.visibility_timeout;
                received.push(envelope);
            }
            // Keep invisible messages ahead of the rest, in their original order.
            while let Some(envelope) = deferred.pop_back() {
                ready.push_front(envelope);
            }
        }

        let messages = received.iter().map(|e| e.message.clone()).collect();
        for envelope in received {
            queues
                .in_flight
                .insert(envelope.message.message_id.clone(), envelope);
        }
        Ok(messages)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<()> {
        match self.queues.lock().await.in_flight.remove(&message.message_id) {
            Some(_) => Ok(()),
            None => Err(BusError::UnknownMessage(message.message_id.clone())),
        }
    }

    async fn nack(&self, message: &QueueMessage, reason: &str) -> Result<()> {
        let envelope = self
            .queues
            .lock()
            .await
            .in_flight
            .remove(&message.message_id)
            .ok_or_else(|| BusError::UnknownMessage(message.message_id.clone()))?;

        if envelope.message.receive_count >= self.max_receive_count {
            let dead_letter = DeadLetter::from_exhausted_retries(
                &envelope.message.handler_id,
                (*envelope.message.record).clone(),
                reason,
                envelope.message.receive_count,
            )
            .with_metadata("table", &envelope.message.record.table);
            self.dead_letters.publish(dead_letter).await?;
            return Ok(());
        }

        warn!(
            handler = %envelope.message.handler_id,
            message_id = %envelope.message.message_id,
            receive_count = envelope.message.receive_count,
            reason = %reason,
            "Handler failed, message will be redelivered"
        );
        let visible_at = Instant::now() + self.visibility_timeout;
        self.queues
            .lock()
            .await
            .ready
            .entry(envelope.message.handler_id.clone())
            .or_default()
            .push_back(Envelope {
                message: envelope.message,
                visible_at,
            });
        Ok(())
    }

    async fn pending(&self) -> usize {
        let queues = self.queues.lock().await;
        queues.ready.values().map(VecDeque::len).sum::<usize>() + queues.in_flight.len()
    }

    async fn visible(&self) -> usize {
        let now = Instant::now();
        let queues = self.queues.lock().await;
        let ready = queues
            .ready
            .values()
            .flat_map(|q| q.iter())
            .filter(|e| e.visible_at <= now)
            .count();
        let expired = queues
            .in_flight
            .values()
            .filter(|e| e.visible_at <= now)
            .count();
        ready + expired
    }
}

#[cfg(test)]
mod tests;
