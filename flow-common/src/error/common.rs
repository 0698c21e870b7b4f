//! Common error types shared across crates.
//!
//! Crate-specific errors can wrap these using `#[from]` or map onto them
//! at the boundary where a lower-level failure surfaces.

use std::time::Duration;
use thiserror::Error;

/// Database-related errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DatabaseError {
    /// Query execution failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Connection to database failed
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Connection pool exhausted
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Query timeout
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),
}

/// Network-related errors.
///
/// Used for WebSocket connections, HTTP requests, and the brokerage
/// session transport.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NetworkError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Connection timeout
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// Request failed
    #[error("Request failed: {0}")]
    Request(String),

    /// Send operation failed
    #[error("Send failed: {0}")]
    Send(String),

    /// Receive operation failed
    #[error("Receive failed: {0}")]
    Receive(String),

    /// Connection was closed
    #[error("Connection closed: {0}")]
    Closed(String),
}

/// Configuration-related errors.
///
/// All of these fail fast at startup; none are retried.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Field has invalid value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Configuration file could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid configuration combination
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigurationError {
    /// Create an InvalidValue error
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Serialization and parsing errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SerializationError {
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        SerializationError::Json(err.to_string())
    }
}

/// Cache-related errors for the hot cache implementations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CacheError {
    /// Cache connection failed
    #[error("Cache connection failed: {0}")]
    Connection(String),

    /// Cache read failed
    #[error("Cache read failed: {0}")]
    Read(String),

    /// Cache write failed
    #[error("Cache write failed: {0}")]
    Write(String),

    /// Cache key not found
    #[error("Cache key not found: {0}")]
    NotFound(String),

    /// Cache serialization failed
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}
