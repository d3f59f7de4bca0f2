//! Domain constants
//!
//! Centralized location for the outbox tunables shared across crates.

// Storage layout
pub const TX_KEY_PREFIX: &str = "tx:";
pub const ENVELOPE_VERSION: u32 = 1;

// Retry policy defaults
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const BASE_RETRY_DELAY_MS: u64 = 1_000;
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;
pub const RETRY_BACKOFF_FACTOR: u32 = 2;

// Jitter multiplies the computed delay by a uniform factor in this range
pub const JITTER_MIN_FACTOR: f64 = 0.5;
pub const JITTER_MAX_FACTOR: f64 = 1.5;
