//! Exponential backoff with jitter for retryable soft failures.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Retry policy for soft tool failures. `max_retries = 0` (the default)
/// means one attempt per `execute` call; the orchestrator loop itself
/// provides the coarse retry budget via domain re-dispatch.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

/// Delay before retry number `attempt` (0-based): exponential, capped, with
/// up to 50% random jitter to avoid thundering herds.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(16))
        .min(config.max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=exp / 2);
    Duration::from_millis(exp + jitter)
}
