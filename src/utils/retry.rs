//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter. Handlers retry write
//! conflicts by re-deriving their decision from current store state.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::RetryConfig;
use crate::repository::RepositoryError;

/// Backoff for handler write conflicts, from configuration.
pub fn conflict_backoff(config: &RetryConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.min_delay_ms))
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
        .with_max_times(config.max_times)
        .with_jitter()
}

/// Determines if a repository error is worth retrying from fresh state.
///
/// Retryable:
/// - `OptimisticLocking`: another writer bumped the version first
/// - `AlreadyExists`: another writer created the target first
///
/// Everything else either cannot succeed on retry or is left to
/// redelivery by the queue.
pub fn is_retryable(error: &RepositoryError) -> bool {
    error.is_conflict()
}
