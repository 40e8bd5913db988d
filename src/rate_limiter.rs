//! Rate Limiter (`spec.md` §4.3)
//!
//! A token-bucket gate on the outbound probe rate, serialized so waiting
//! callers queue rather than stampede, with dynamic reconfiguration and
//! statistics.

use crate::clock::SharedClock;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct Bucket {
    rate_per_minute: f64,
    burst_multiplier: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rate_per_minute: f64, burst_multiplier: f64, now: Instant) -> Self {
        let capacity = rate_per_minute * burst_multiplier;
        Self {
            rate_per_minute,
            burst_multiplier,
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    fn per_second(&self) -> f64 {
        self.rate_per_minute / 60.0
    }

    /// Refills tokens for elapsed time, guarding against a clock that
    /// appears to have jumped backward.
    fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            self.last_refill = now;
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let added = elapsed * self.per_second();
        self.tokens = (self.tokens + added).min(self.capacity);
        self.last_refill = now;
    }

    fn wait_time(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let needed = 1.0 - self.tokens;
        let per_second = self.per_second();
        if per_second <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(needed / per_second)
    }

    fn set_rate(&mut self, new_rate_per_minute: f64) {
        let old_capacity = self.capacity;
        self.rate_per_minute = new_rate_per_minute;
        self.capacity = new_rate_per_minute * self.burst_multiplier;
        self.tokens = if old_capacity > 0.0 {
            self.capacity * (self.tokens / old_capacity)
        } else {
            self.capacity
        };
    }
}

/// Rate-limiter statistics. See `spec.md` §4.3.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RateLimiterStatistics {
    /// Acquisitions that did not need to wait.
    pub allowed: u64,
    /// Acquisitions that had to wait for a token.
    pub delayed: u64,
    /// Total wait time accumulated across delayed acquisitions, in seconds.
    pub total_wait_time_secs: f64,
    /// Longest single wait, in seconds.
    pub max_wait_time_secs: f64,
}

impl RateLimiterStatistics {
    /// Average wait time across delayed acquisitions, in seconds.
    #[must_use]
    pub fn avg_wait_time_secs(&self) -> f64 {
        if self.delayed == 0 {
            0.0
        } else {
            self.total_wait_time_secs / self.delayed as f64
        }
    }
}

/// Token-bucket rate limiter gating the outbound probe stream.
///
/// `acquire` serializes callers behind an async mutex so that waiting
/// itself is queued rather than racing (`spec.md` §4.3's concurrency
/// contract): if the awaiting task is canceled mid-wait, the bucket is
/// untouched because the token is only deducted after the sleep
/// completes, inside the same locked section that produced the wait.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    stats: std::sync::Mutex<RateLimiterStatistics>,
    clock: SharedClock,
}

impl RateLimiter {
    /// Creates a new rate limiter at the given rate and burst multiplier.
    #[must_use]
    pub fn new(rate_per_minute: f64, burst_multiplier: f64, clock: SharedClock) -> Self {
        let now = clock.now_monotonic();
        Self {
            bucket: Mutex::new(Bucket::new(rate_per_minute, burst_multiplier, now)),
            stats: std::sync::Mutex::new(RateLimiterStatistics::default()),
            clock,
        }
    }

    /// Waits (cooperatively) until a token is available, then consumes
    /// one. If `rate_per_minute` is configured to zero this never
    /// returns; callers must check an external "should process" gate
    /// before calling (`spec.md` §4.3's failure mode).
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(self.clock.now_monotonic());

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            self.stats.lock().expect("rate limiter stats poisoned").allowed += 1;
            return;
        }

        let wait = bucket.wait_time();
        if wait > Duration::ZERO {
            debug!(wait_secs = wait.as_secs_f64(), "rate limit reached, waiting");
            if wait > Duration::from_secs(60) {
                warn!(wait_secs = wait.as_secs_f64(), "significant rate-limit delay");
            }
            {
                let mut stats = self.stats.lock().expect("rate limiter stats poisoned");
                stats.delayed += 1;
                stats.total_wait_time_secs += wait.as_secs_f64();
                stats.max_wait_time_secs = stats.max_wait_time_secs.max(wait.as_secs_f64());
            }
            self.clock.sleep(wait).await;
            bucket.refill(self.clock.now_monotonic());
        }

        bucket.tokens -= 1.0;
        self.stats.lock().expect("rate limiter stats poisoned").allowed += 1;
    }

    /// Updates the rate dynamically, rescaling the current token count
    /// to preserve relative fullness (`spec.md` §4.3).
    pub async fn set_rate(&self, new_rate_per_minute: f64) {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(self.clock.now_monotonic());
        let old_rate = bucket.rate_per_minute;
        bucket.set_rate(new_rate_per_minute);
        info!(old_rate, new_rate = new_rate_per_minute, "rate limiter rate changed");
    }

    /// Resets the bucket to full capacity.
    pub async fn reset(&self) {
        let mut bucket = self.bucket.lock().await;
        bucket.tokens = bucket.capacity;
        bucket.last_refill = self.clock.now_monotonic();
    }

    /// Current statistics snapshot.
    #[must_use]
    pub fn get_statistics(&self) -> RateLimiterStatistics {
        *self.stats.lock().expect("rate limiter stats poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_clock;
    use std::time::Duration;

    #[tokio::test]
    async fn burst_capacity_allows_immediate_acquires_up_to_capacity() {
        let clock = test_clock(chrono::Utc::now());
        let limiter = RateLimiter::new(60.0, 2.0, clock);
        for _ in 0..120 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.get_statistics().allowed, 120);
        assert_eq!(limiter.get_statistics().delayed, 0);
    }

    #[tokio::test]
    async fn exhausting_the_bucket_forces_a_wait() {
        let clock = test_clock(chrono::Utc::now());
        let limiter = RateLimiter::new(60.0, 1.0, clock);
        for _ in 0..60 {
            limiter.acquire().await;
        }
        // Bucket now empty; next acquire must wait (clock advances
        // virtually, so this resolves without a real-time sleep).
        limiter.acquire().await;
        assert_eq!(limiter.get_statistics().delayed, 1);
    }

    #[tokio::test]
    async fn set_rate_preserves_relative_fullness() {
        let clock = test_clock(chrono::Utc::now());
        let limiter = RateLimiter::new(60.0, 1.0, clock);
        limiter.acquire().await; // consume 1 of 60 -> 59/60 full
        limiter.set_rate(30.0).await;
        let bucket = limiter.bucket.lock().await;
        assert!((bucket.capacity - 30.0).abs() < 1e-9);
        let expected_tokens = 30.0 * (59.0 / 60.0);
        assert!((bucket.tokens - expected_tokens).abs() < 1e-6);
    }

    #[tokio::test]
    async fn backward_clock_jump_does_not_go_negative_or_above_capacity() {
        let clock = test_clock(chrono::Utc::now());
        let limiter = RateLimiter::new(60.0, 2.0, clock.clone());
        limiter.acquire().await;
        // Simulate a backward jump by not advancing at all and calling
        // refill directly through another acquire; tokens must remain
        // within [0, capacity].
        let mut bucket = limiter.bucket.lock().await;
        bucket.last_refill = Instant::now() + Duration::from_secs(10);
        bucket.refill(Instant::now());
        assert!(bucket.tokens >= 0.0);
        assert!(bucket.tokens <= bucket.capacity);
    }

    #[tokio::test]
    async fn rolling_window_upper_bound_rate_plus_burst() {
        let clock = test_clock(chrono::Utc::now());
        let limiter = RateLimiter::new(6.0, 1.0, clock.clone());
        let mut allowed_immediately = 0;
        for _ in 0..10 {
            let before = limiter.get_statistics().allowed;
            limiter.acquire().await;
            if limiter.get_statistics().allowed == before + 1
                && limiter.get_statistics().delayed == 0
            {
                allowed_immediately += 1;
            }
        }
        // capacity = 6*1 = 6 tokens available immediately.
        assert!(allowed_immediately <= 6);
    }
}
