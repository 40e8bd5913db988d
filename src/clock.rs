//! Time abstraction layer for testable time-dependent operations
//!
//! The mapper mixes two notions of time (`spec.md` §5 "Clock"): a
//! monotonic clock used for rate-limit refill and probe timeouts, and a
//! wall clock used for `last_seen`/`next_recheck`/persistence timestamps
//! and quiet-hours comparisons. A single `Clock` trait exposes both so
//! that tests can advance a virtual clock deterministically instead of
//! sleeping in real time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Trait for providing time-related functionality.
///
/// This allows dependency injection of time behavior, enabling
/// deterministic, fast test execution without real-time delays.
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration);

    /// Current wall-clock time, used for persisted timestamps and
    /// quiet-hours comparisons.
    fn now_wall(&self) -> DateTime<Utc>;

    /// Current monotonic instant, used for rate-limit refill and probe
    /// timeouts.
    fn now_monotonic(&self) -> Instant;
}

/// Shared handle to a clock implementation.
pub type SharedClock = Arc<dyn Clock>;

/// Real clock for production use.
#[derive(Debug, Clone, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Clock for RealClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now_wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct TestClockState {
    wall: DateTime<Utc>,
    monotonic_base: Instant,
    monotonic_offset: Duration,
}

/// Deterministic, manually-advanced clock for tests.
///
/// `sleep` does not block: it advances the virtual clock by the
/// requested duration and yields once, so concurrent tasks waiting on
/// this clock make forward progress without real delay. Tests that need
/// fine control should prefer calling `advance` directly and only rely
/// on `sleep`'s implicit advance for code under test that the test does
/// not otherwise control.
#[derive(Debug, Clone)]
pub struct TestClock {
    state: Arc<Mutex<TestClockState>>,
}

impl TestClock {
    /// Creates a new test clock starting at the given wall-clock time.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TestClockState {
                wall: start,
                monotonic_base: Instant::now(),
                monotonic_offset: Duration::ZERO,
            })),
        }
    }

    /// Advances both the wall clock and the monotonic clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().expect("test clock poisoned");
        state.wall += chrono::Duration::from_std(duration).unwrap_or_default();
        state.monotonic_offset += duration;
    }

    /// Sets the wall-clock time directly, without affecting the
    /// monotonic clock. Useful for quiet-hours tests that need to land
    /// on a specific time of day.
    pub fn set_wall(&self, wall: DateTime<Utc>) {
        let mut state = self.state.lock().expect("test clock poisoned");
        state.wall = wall;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for TestClock {
    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    fn now_wall(&self) -> DateTime<Utc> {
        self.state.lock().expect("test clock poisoned").wall
    }

    fn now_monotonic(&self) -> Instant {
        let state = self.state.lock().expect("test clock poisoned");
        state.monotonic_base + state.monotonic_offset
    }
}

/// Creates a production clock.
#[must_use]
pub fn production_clock() -> SharedClock {
    Arc::new(RealClock::new())
}

/// Creates a deterministic test clock starting at the given wall-clock time.
#[must_use]
pub fn test_clock(start: DateTime<Utc>) -> Arc<TestClock> {
    Arc::new(TestClock::new(start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clock_sleep_advances_virtual_time_without_real_delay() {
        let clock = TestClock::new(Utc::now());
        let before = clock.now_monotonic();
        let start = Instant::now();

        clock.sleep(Duration::from_secs(3600)).await;

        assert!(clock.now_monotonic() - before >= Duration::from_secs(3600));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn real_clock_actually_sleeps() {
        let clock = RealClock::new();
        let start = Instant::now();
        clock.sleep(Duration::from_millis(20)).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn set_wall_does_not_move_monotonic() {
        let clock = TestClock::new(Utc::now());
        let m0 = clock.now_monotonic();
        clock.set_wall(Utc::now() + chrono::Duration::hours(5));
        assert_eq!(clock.now_monotonic(), m0);
    }
}
