//! Change-propagation runtime configuration.

use std::time::Duration;

use serde::Deserialize;

/// Handler queue behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a failed message stays invisible before redelivery.
    pub visibility_timeout_secs: u64,
    /// Deliveries before a message is dead-lettered.
    pub max_receive_count: u32,
    /// Messages handed to a handler per receive.
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 30,
            max_receive_count: 5,
            batch_size: 10,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

/// Backoff for conflict retries inside enrichers and reducers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_times: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 10,
            max_delay_ms: 1_000,
            max_times: 5,
        }
    }
}
