//! Normalized observation records.
//!
//! Every payload acquired from a provider — REST response, WebSocket
//! message, or depth update — is normalized into an [`Observation`]
//! before it reaches the cache/archive sink. The content hash over the
//! canonical payload drives archive deduplication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Addressing scope of an observation.
///
/// Scopes render as `global`, `SPY`, `SPY|450`, or `SPY|450|2026-09-18`
/// and are used verbatim as archive columns and hot-cache key segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Market-wide data not tied to a symbol
    Global,
    /// Data tied to a symbol, optionally narrowed to a strike and expiry
    Symbol {
        symbol: String,
        strike: Option<String>,
        expiry: Option<String>,
    },
}

impl Scope {
    /// Market-wide scope
    pub fn global() -> Self {
        Scope::Global
    }

    /// Scope for a symbol (normalized to uppercase)
    pub fn symbol(symbol: impl AsRef<str>) -> Self {
        Scope::Symbol {
            symbol: symbol.as_ref().to_uppercase(),
            strike: None,
            expiry: None,
        }
    }

    /// Narrow a symbol scope to a strike level
    pub fn with_strike(self, strike: impl Into<String>) -> Self {
        match self {
            Scope::Symbol { symbol, expiry, .. } => Scope::Symbol {
                symbol,
                strike: Some(strike.into()),
                expiry,
            },
            other => other,
        }
    }

    /// Narrow a symbol scope to an expiry date
    pub fn with_expiry(self, expiry: impl Into<String>) -> Self {
        match self {
            Scope::Symbol { symbol, strike, .. } => Scope::Symbol {
                symbol,
                strike,
                expiry: Some(expiry.into()),
            },
            other => other,
        }
    }

    /// The symbol this scope refers to, if any
    pub fn symbol_name(&self) -> Option<&str> {
        match self {
            Scope::Global => None,
            Scope::Symbol { symbol, .. } => Some(symbol),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Symbol {
                symbol,
                strike,
                expiry,
            } => {
                write!(f, "{}", symbol)?;
                if let Some(strike) = strike {
                    write!(f, "|{}", strike)?;
                }
                if let Some(expiry) = expiry {
                    write!(f, "|{}", expiry)?;
                }
                Ok(())
            }
        }
    }
}

/// Hot-cache retention behavior for an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    /// Only the latest value for the scope is kept
    Snapshot,
    /// A capped, ordered history of recent values is kept
    BoundedLog,
}

impl CacheKind {
    /// Key segment used in hot-cache key namespacing
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Snapshot => "snapshot",
            CacheKind::BoundedLog => "log",
        }
    }
}

/// A normalized observation flowing into the cache/archive sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Logical feed the payload came from, e.g. `rest:stock_greek_exposure`
    /// or `ws:flow-alerts`
    pub source: String,
    /// Addressing scope
    pub scope: Scope,
    /// Hot-cache retention behavior
    pub kind: CacheKind,
    /// The payload exactly as decoded from the provider
    pub payload: Value,
    /// Provider-side event time where available, otherwise receive time
    pub observed_at: DateTime<Utc>,
    /// Local time the payload was fetched/received
    pub fetched_at: DateTime<Utc>,
}

impl Observation {
    /// Create an observation stamped with the current time.
    pub fn new(
        source: impl Into<String>,
        scope: Scope,
        kind: CacheKind,
        payload: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            source: source.into(),
            scope,
            kind,
            payload,
            observed_at: now,
            fetched_at: now,
        }
    }

    /// Set the provider-side event time.
    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }

    /// Deterministic digest of the canonical payload.
    ///
    /// serde_json serializes object keys in sorted order, so two payloads
    /// with the same content always hash identically regardless of the
    /// key order they arrived in.
    pub fn content_hash(&self) -> String {
        let canonical = self.payload.to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_rendering() {
        assert_eq!(Scope::global().to_string(), "global");
        assert_eq!(Scope::symbol("spy").to_string(), "SPY");
        assert_eq!(Scope::symbol("SPY").with_strike("450").to_string(), "SPY|450");
        assert_eq!(
            Scope::symbol("SPY")
                .with_strike("450")
                .with_expiry("2026-09-18")
                .to_string(),
            "SPY|450|2026-09-18"
        );
    }

    #[test]
    fn content_hash_ignores_key_order() {
        let a = Observation::new(
            "ws:gex",
            Scope::symbol("SPY"),
            CacheKind::Snapshot,
            json!({"gamma": 1.5, "ticker": "SPY"}),
        );
        let b = Observation::new(
            "ws:gex",
            Scope::symbol("SPY"),
            CacheKind::Snapshot,
            serde_json::from_str(r#"{"ticker":"SPY","gamma":1.5}"#).unwrap(),
        );
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_differs_for_different_payloads() {
        let a = Observation::new(
            "ws:gex",
            Scope::symbol("SPY"),
            CacheKind::Snapshot,
            json!({"gamma": 1.5}),
        );
        let b = Observation::new(
            "ws:gex",
            Scope::symbol("SPY"),
            CacheKind::Snapshot,
            json!({"gamma": 2.5}),
        );
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
