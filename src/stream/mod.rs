//! Change-stream boundary.
//!
//! A change record is what the store's stream delivers for one write:
//! the event type, the item's keys, and its images. Delivery is
//! at-least-once and ordered only within a partition.

use serde::{Deserialize, Serialize};

use crate::ir::{CdcEvent, ENTITY_TYPE_COLUMN};
use crate::storage::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Insert,
    Modify,
    Remove,
}

impl EventType {
    /// Whether a handler subscribed to `event` receives this record.
    pub fn matches(self, event: CdcEvent) -> bool {
        match event {
            CdcEvent::Upsert => matches!(self, Self::Insert | Self::Modify),
            CdcEvent::Insert => self == Self::Insert,
            CdcEvent::Modify => self == Self::Modify,
            CdcEvent::Remove => self == Self::Remove,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Insert => "INSERT",
            Self::Modify => "MODIFY",
            Self::Remove => "REMOVE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub event_id: String,
    /// Physical table the write happened in.
    pub table: String,
    pub event_type: EventType,
    pub keys: Item,
    #[serde(default)]
    pub new_image: Option<Item>,
    #[serde(default)]
    pub old_image: Option<Item>,
}

impl ChangeRecord {
    /// The image handlers read: the new one, or the old one for removes.
    pub fn image(&self) -> Option<&Item> {
        match self.event_type {
            EventType::Remove => self.old_image.as_ref(),
            _ => self.new_image.as_ref(),
        }
    }

    /// Logical type of the changed item, from its discriminator column.
    pub fn entity_type(&self) -> Option<&str> {
        self.image()
            .or(self.old_image.as_ref())
            .and_then(|image| image.get(ENTITY_TYPE_COLUMN))
            .and_then(|value| value.as_str())
    }
}

/// One record the consumer could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

/// Per-record failures of one batch, so only those records are redelivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchResponse {
    pub fn fail(&mut self, item_identifier: impl Into<String>) {
        self.batch_item_failures.push(BatchItemFailure {
            item_identifier: item_identifier.into(),
        });
    }

    pub fn is_success(&self) -> bool {
        self.batch_item_failures.is_empty()
    }
}
