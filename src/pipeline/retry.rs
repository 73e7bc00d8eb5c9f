//! Retry / backoff policy.
//!
//! Pure decision logic shared by the JSON and stream executors. The policy is chosen once
//! per call (default or caller override) and never mutated while the call runs.

use rand::Rng;
use std::time::Duration;

use crate::error_code::ErrorCode;

/// Predicate deciding whether a failure with this status/code may be retried.
pub type RetryPredicate = fn(Option<u16>, Option<ErrorCode>) -> bool;

/// Lower bound of the uniform jitter factor.
pub const JITTER_MIN: f64 = 0.85;
/// Upper bound of the uniform jitter factor.
pub const JITTER_MAX: f64 = 1.15;

/// Configuration for retry logic
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Re-attempts after the first try
    pub retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub retry_on: RetryPredicate,
}

/// The process-wide default: 2 retries, 300 ms base, 2 s cap.
pub const DEFAULT_RETRY_POLICY: RetryPolicy = RetryPolicy {
    retries: 2,
    base_delay_ms: 300,
    max_delay_ms: 2000,
    retry_on: default_retry_on,
};

impl Default for RetryPolicy {
    fn default() -> Self {
        DEFAULT_RETRY_POLICY
    }
}

/// Retry when no status was received, on 5xx, and on 429. Never otherwise.
pub fn default_retry_on(status: Option<u16>, _code: Option<ErrorCode>) -> bool {
    match status {
        None => true,
        Some(s) => s >= 500 || s == 429,
    }
}

impl RetryPolicy {
    /// A policy that never re-attempts.
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..DEFAULT_RETRY_POLICY
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_delays(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_predicate(mut self, retry_on: RetryPredicate) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn should_retry(&self, status: Option<u16>, code: Option<ErrorCode>) -> bool {
        (self.retry_on)(status, code)
    }

    /// Un-jittered delay: `min(max, base * 2^attempt)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Jittered delay for a 0-based attempt index.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Same as [`RetryPolicy::delay`] with an explicit RNG.
    ///
    /// The jittered value is clamped so it never exceeds `max_delay_ms`.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let factor: f64 = rng.gen_range(JITTER_MIN..=JITTER_MAX);
        let ms = (base * factor).round().min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(ms as u64)
    }

    /// Delay to wait before the next attempt, honoring a provider hint when present.
    pub fn delay_for(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        match retry_after_ms {
            Some(hint) => Duration::from_millis(hint.min(self.max_delay_ms)),
            None => self.delay(attempt),
        }
    }
}
