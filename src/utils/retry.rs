//! Retry utilities: backoff builders.
//!
//! Uses `backon` for exponential backoff with jitter. Provides the policies
//! for queue sends and in-process store retries.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for queue sends (self-requeue, scoring trigger, score batches).
///
/// - Min delay: 50ms
/// - Max delay: 2s
/// - Max attempts: 5
/// - Jitter enabled
pub fn queue_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(5)
        .with_jitter()
}

/// Backoff for store writes retried in-process.
///
/// - Min delay: 10ms
/// - Max delay: 1s
/// - Max attempts: 3
/// - Jitter enabled
pub fn store_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(3)
        .with_jitter()
}
