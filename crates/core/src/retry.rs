//! Retry policy: bounded exponential backoff with optional jitter

use driftq_domain::constants::{
    BASE_RETRY_DELAY_MS, DEFAULT_MAX_RETRIES, JITTER_MAX_FACTOR, JITTER_MIN_FACTOR,
    MAX_RETRY_DELAY_MS, RETRY_BACKOFF_FACTOR,
};
use driftq_domain::MutationError;
use rand::Rng;

// Exponents past this point are already clamped by the delay cap
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Decides retry-vs-fail and computes the next-attempt delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: DEFAULT_MAX_RETRIES, jitter: true }
    }
}

impl RetryPolicy {
    /// Create a policy with explicit settings
    pub fn new(max_retries: u32, jitter: bool) -> Self {
        Self { max_retries, jitter }
    }

    /// Maximum number of retry attempts before a transaction is failed
    /// permanently
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether another attempt may be scheduled after `error` on a
    /// transaction that has already been retried `retry_count` times.
    pub fn should_retry(&self, error: &MutationError, retry_count: u32) -> bool {
        error.is_retriable() && retry_count < self.max_retries
    }

    /// Delay before attempt `retry_count + 1`, in milliseconds:
    /// `min(60s, 1s * 2^retry_count)`, multiplied by a uniform factor in
    /// `[0.5, 1.5]` when jitter is enabled.
    pub fn calculate_delay(&self, retry_count: u32) -> u64 {
        let exponent = retry_count.min(MAX_BACKOFF_EXPONENT);
        let multiplier = u64::from(RETRY_BACKOFF_FACTOR).saturating_pow(exponent);
        let delay = BASE_RETRY_DELAY_MS.saturating_mul(multiplier).min(MAX_RETRY_DELAY_MS);

        if self.jitter {
            let factor = rand::thread_rng().gen_range(JITTER_MIN_FACTOR..=JITTER_MAX_FACTOR);
            (delay as f64 * factor).round() as u64
        } else {
            delay
        }
    }
}
