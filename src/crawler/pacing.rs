//! Pacing for the fetch loop
//!
//! Every suspension in the harvester is a timed sleep: politeness jitter
//! before requests, cooldowns after soft blocks, pauses on identity rotation
//! and fixed delays between work units. This module turns configured ranges
//! into durations and makes each sleep interruptible by the job's
//! cancellation token.

use crate::config::{FetchConfig, JitterRange};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry and politeness policy shared by every fetch call site
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Failed attempts tolerated before giving up; a fetch makes at most
    /// `max_retries + 1` attempts
    pub max_retries: u32,

    /// Per-request timeout handed to the HTTP client
    pub request_timeout: Duration,

    /// Pause before every attempt
    pub politeness_jitter: JitterRange,

    /// Extra pause after a soft block
    pub soft_block_cooldown: JitterRange,
}

impl RetryPolicy {
    /// Builds the policy from the `[fetch]` section
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            politeness_jitter: config.politeness_jitter,
            soft_block_cooldown: config.soft_block_cooldown,
        }
    }

    /// A policy without any pauses, for tests and local mocks
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            request_timeout: Duration::from_secs(10),
            politeness_jitter: JitterRange::zero(),
            soft_block_cooldown: JitterRange::zero(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

/// Draws a uniformly distributed duration from the range
pub fn sample(range: JitterRange) -> Duration {
    if range.max_ms <= range.min_ms {
        return Duration::from_millis(range.min_ms);
    }
    let millis = rand::rng().random_range(range.min_ms..=range.max_ms);
    Duration::from_millis(millis)
}

/// Sleeps for `duration` unless the token is cancelled first
///
/// # Returns
///
/// * `true` - The full duration elapsed
/// * `false` - The job was cancelled before or during the sleep
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if duration.is_zero() {
        return true;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Sleeps for a randomized duration drawn from `range`
pub async fn pause_jittered(range: JitterRange, cancel: &CancellationToken) -> bool {
    pause(sample(range), cancel).await
}
