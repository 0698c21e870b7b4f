//! Hot-cache abstraction.
//!
//! The hot cache holds the freshest observations for downstream
//! consumers: one latest value per snapshot scope, and a capped ordered
//! log per bounded-log scope. Two implementations are provided behind
//! one trait: an in-memory cache for tests and single-process setups,
//! and a Redis-backed cache for shared deployments.
//!
//! Keys are namespaced as `hot:{source}:{kind}:{scope}`.

mod memory;
mod redis;

pub use memory::InMemoryHotCache;
pub use self::redis::RedisHotCache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CacheError;
use crate::record::{CacheKind, Scope};

/// A cached payload together with its fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn new(payload: Value, fetched_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            fetched_at,
        }
    }
}

/// Render the hot-cache key for a (source, kind, scope) triple.
pub fn cache_key(source: &str, kind: CacheKind, scope: &Scope) -> String {
    format!("hot:{}:{}:{}", source, kind.as_str(), scope)
}

/// Hot cache interface shared by all acquisition paths.
///
/// Implementations must be safe for concurrent calls; writes to
/// different keys are independent, and a snapshot replacement is atomic
/// per key (a concurrent reader sees either the old or the new entry,
/// never a mix).
#[async_trait]
pub trait HotCache: Send + Sync {
    /// Overwrite the latest value for a snapshot scope.
    async fn put_snapshot(
        &self,
        source: &str,
        scope: &Scope,
        entry: CachedEntry,
    ) -> Result<(), CacheError>;

    /// Read the latest value for a snapshot scope.
    async fn get_snapshot(
        &self,
        source: &str,
        scope: &Scope,
    ) -> Result<Option<CachedEntry>, CacheError>;

    /// Append to a bounded log, evicting the oldest entries past the cap.
    async fn append_log(
        &self,
        source: &str,
        scope: &Scope,
        entry: CachedEntry,
    ) -> Result<(), CacheError>;

    /// Read the most recent `limit` log entries, newest first.
    async fn tail_log(
        &self,
        source: &str,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<CachedEntry>, CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_namespacing() {
        assert_eq!(
            cache_key("ws:gex", CacheKind::Snapshot, &Scope::symbol("SPY")),
            "hot:ws:gex:snapshot:SPY"
        );
        assert_eq!(
            cache_key("rest:market_tide", CacheKind::BoundedLog, &Scope::global()),
            "hot:rest:market_tide:log:global"
        );
    }
}
