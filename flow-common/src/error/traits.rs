//! Error classification traits for retry logic.
//!
//! Errors self-describe their retry characteristics so callers do not
//! need to match on concrete variants at every call site.

use std::time::Duration;

use super::common::*;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient errors that may resolve on retry (network issues, timeouts)
    Transient,
    /// Permanent errors that won't resolve on retry (bad request, malformed payload)
    Permanent,
    /// Resource exhaustion errors (rate limits, subscription caps)
    ResourceExhausted,
    /// Configuration errors (missing config, invalid settings)
    Configuration,
    /// Internal errors (bugs, unexpected state)
    Internal,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    /// Returns true if this error is permanent and won't succeed on retry
    fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Permanent)
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(100)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    /// Returns the maximum number of retries suggested for this error
    fn max_retries(&self) -> u32 {
        match self.category() {
            ErrorCategory::Transient => 3,
            ErrorCategory::ResourceExhausted => 5,
            _ => 0,
        }
    }
}

impl ErrorClassification for DatabaseError {
    fn category(&self) -> ErrorCategory {
        match self {
            DatabaseError::Connection(_) => ErrorCategory::Transient,
            DatabaseError::PoolExhausted => ErrorCategory::ResourceExhausted,
            DatabaseError::Timeout(_) => ErrorCategory::Transient,
            DatabaseError::Query(_) => ErrorCategory::Permanent,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            DatabaseError::PoolExhausted => Some(Duration::from_millis(500)),
            DatabaseError::Timeout(_) => Some(Duration::from_millis(100)),
            DatabaseError::Connection(_) => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

impl ErrorClassification for NetworkError {
    fn category(&self) -> ErrorCategory {
        match self {
            NetworkError::Connection(_) => ErrorCategory::Transient,
            NetworkError::Timeout(_) => ErrorCategory::Transient,
            NetworkError::Request(_) => ErrorCategory::Transient,
            NetworkError::Send(_) => ErrorCategory::Transient,
            NetworkError::Receive(_) => ErrorCategory::Transient,
            NetworkError::Closed(_) => ErrorCategory::Transient,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            NetworkError::Timeout(_) => Some(Duration::from_millis(500)),
            NetworkError::Connection(_) => Some(Duration::from_secs(1)),
            NetworkError::Closed(_) => Some(Duration::from_millis(100)),
            _ => Some(Duration::from_millis(100)),
        }
    }
}

impl ErrorClassification for ConfigurationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        None
    }

    fn max_retries(&self) -> u32 {
        0
    }
}

impl ErrorClassification for SerializationError {
    fn category(&self) -> ErrorCategory {
        // Bad data won't change on retry
        ErrorCategory::Permanent
    }
}

impl ErrorClassification for CacheError {
    fn category(&self) -> ErrorCategory {
        match self {
            CacheError::Connection(_) => ErrorCategory::Transient,
            CacheError::Read(_) => ErrorCategory::Transient,
            CacheError::Write(_) => ErrorCategory::Transient,
            CacheError::NotFound(_) => ErrorCategory::Permanent,
            CacheError::Serialization(_) => ErrorCategory::Permanent,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            CacheError::Connection(_) => Some(Duration::from_secs(1)),
            CacheError::Read(_) | CacheError::Write(_) => Some(Duration::from_millis(100)),
            _ => None,
        }
    }
}

/// Helper function for retry logic with exponential backoff.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
) -> Result<T, E>
where
    E: ErrorClassification + std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut delay = initial_delay;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempts += 1;

                if !err.is_transient() || attempts >= max_attempts {
                    return Err(err);
                }

                let retry_delay = err.suggested_retry_delay().unwrap_or(delay);
                tokio::time::sleep(retry_delay).await;

                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }
}
