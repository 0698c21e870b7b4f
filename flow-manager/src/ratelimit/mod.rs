//! Token-bucket rate limiting for the vendor REST quota.
//!
//! One bucket is constructed at startup and handed to every REST caller;
//! there is no ambient singleton. Refill is continuous: tokens accrue
//! proportionally to elapsed time on every acquire attempt, capped at
//! bucket capacity. Waiters are served in arrival order via a fair
//! mutex, so a burst of one-token requests cannot starve an earlier
//! multi-token request.

use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use flow_common::error::{ErrorCategory, ErrorClassification};

use crate::config::RateLimitSettings;

/// Rate limiter errors
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// The wait for tokens exceeded the caller's timeout
    #[error("rate limit wait timed out after {0:?}")]
    Timeout(Duration),
}

impl ErrorClassification for RateLimitError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::ResourceExhausted
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        Some(Duration::from_secs(1))
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
    // Fair queue for waiters: tokio's Mutex wakes lockers in FIFO order,
    // so holding this while waiting gives each caller its turn.
    turn: tokio::sync::Mutex<()>,
}

impl TokenBucket {
    /// Create a bucket with the given capacity and per-second refill rate.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a bucket from configuration.
    ///
    /// The configured per-minute budget doubles as burst capacity unless
    /// a separate `burst_capacity` is set.
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        let capacity = settings
            .burst_capacity
            .unwrap_or(settings.requests_per_minute);
        Self::new(capacity, settings.requests_per_minute as f64 / 60.0)
    }

    /// Try to take `tokens` without waiting.
    pub fn try_acquire(&self, tokens: u32) -> bool {
        let mut state = self.state.lock();
        Self::refill(&mut state, self.capacity, self.refill_per_sec);
        if state.tokens >= tokens as f64 {
            state.tokens -= tokens as f64;
            true
        } else {
            false
        }
    }

    /// Wait until `tokens` are available, up to `timeout`.
    ///
    /// Tokens are only debited once the full amount is available, so the
    /// observable balance never goes negative.
    pub async fn acquire_async(&self, tokens: u32, timeout: Duration) -> Result<(), RateLimitError> {
        let deadline = Instant::now() + timeout;

        let _turn = tokio::time::timeout_at(deadline, self.turn.lock())
            .await
            .map_err(|_| RateLimitError::Timeout(timeout))?;

        loop {
            let wait = {
                let mut state = self.state.lock();
                Self::refill(&mut state, self.capacity, self.refill_per_sec);
                if state.tokens >= tokens as f64 {
                    state.tokens -= tokens as f64;
                    return Ok(());
                }
                let deficit = tokens as f64 - state.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };

            let wake_at = Instant::now() + wait;
            if wake_at > deadline {
                return Err(RateLimitError::Timeout(timeout));
            }
            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Current token balance after refill (approximate; for logging and tests).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        Self::refill(&mut state, self.capacity, self.refill_per_sec);
        state.tokens
    }

    /// Configured bucket capacity.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(state: &mut BucketState, capacity: f64, refill_per_sec: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        state.tokens = (state.tokens + elapsed * refill_per_sec).min(capacity);
        state.last_refill = now;
    }
}
