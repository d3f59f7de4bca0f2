//! Wall-clock abstraction for testability
//!
//! Retry eligibility and backoff arithmetic are all wall-clock driven
//! (`next_attempt_at` is persisted as epoch milliseconds), so the executor
//! takes its notion of "now" from a [`Clock`] rather than calling the system
//! clock directly. Tests drive a [`MockClock`] to step through retry windows
//! without waiting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

/// Source of wall-clock time, epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Current wall-clock time as milliseconds since the UNIX epoch
    fn epoch_ms(&self) -> i64;
}

/// Real system clock implementation. Use this in production code.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Mock clock for deterministic testing
///
/// Starts at a fixed base instant and only moves when advanced manually, so
/// retry windows can be crossed without real time passing. Clones share the
/// same elapsed time.
#[derive(Debug, Clone)]
pub struct MockClock {
    base_ms: i64,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a mock clock anchored at the current real time
    pub fn new() -> Self {
        Self::at(Utc::now().timestamp_millis())
    }

    /// Create a mock clock anchored at a specific epoch-ms instant
    pub fn at(base_ms: i64) -> Self {
        Self { base_ms, elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        // Test utility: panic on poisoned mutex to fail tests early
        let mut elapsed = self.elapsed.lock().expect("mutex poisoned");
        *elapsed += duration;
    }

    /// Set the elapsed time to an absolute value
    pub fn set_elapsed(&self, duration: Duration) {
        // Test utility: panic on poisoned mutex to fail tests early
        let mut elapsed = self.elapsed.lock().expect("mutex poisoned");
        *elapsed = duration;
    }

    /// How much simulated time has passed since creation
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        // Test utility: panic on poisoned mutex to fail tests early
        *self.elapsed.lock().expect("mutex poisoned")
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn epoch_ms(&self) -> i64 {
        let elapsed = *self.elapsed.lock().expect("mutex poisoned");
        self.base_ms + elapsed.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the clock abstraction.
    use super::*;

    /// Validates the system clock scenario.
    ///
    /// Assertions:
    /// - Ensures successive readings never go backwards.
    #[test]
    fn test_system_clock_monotone_enough() {
        let clock = SystemClock;
        let a = clock.epoch_ms();
        let b = clock.epoch_ms();
        assert!(b >= a);
    }

    /// Validates `MockClock::at` behavior for the advance scenario.
    ///
    /// Assertions:
    /// - Confirms the anchored base is reported before advancing.
    /// - Confirms `advance` moves the reading by exactly that amount.
    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::at(1_000);
        assert_eq!(clock.epoch_ms(), 1_000);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.epoch_ms(), 1_250);
    }

    /// Validates `MockClock::clone` behavior for the shared elapsed scenario.
    ///
    /// Assertions:
    /// - Confirms clones observe advances made through either handle.
    #[test]
    fn test_mock_clock_clone_shares_elapsed() {
        let clock1 = MockClock::at(0);
        let clock2 = clock1.clone();

        clock1.advance(Duration::from_secs(5));
        assert_eq!(clock2.epoch_ms(), 5_000);

        clock2.advance(Duration::from_secs(1));
        assert_eq!(clock1.epoch_ms(), 6_000);
    }

    /// Validates `MockClock::set_elapsed` behavior for the absolute rewind
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms `set_elapsed` replaces any previous elapsed time.
    #[test]
    fn test_mock_clock_set_elapsed() {
        let clock = MockClock::at(0);
        clock.advance(Duration::from_secs(30));

        clock.set_elapsed(Duration::from_secs(10));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
        assert_eq!(clock.epoch_ms(), 10_000);
    }
}
