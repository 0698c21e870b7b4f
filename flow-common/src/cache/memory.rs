//! In-memory hot cache.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

use super::{cache_key, CachedEntry, HotCache};
use crate::error::CacheError;
use crate::record::{CacheKind, Scope};

/// In-memory hot cache backed by per-kind hash maps.
///
/// Snapshot replacement happens under the write lock, so readers observe
/// either the previous or the new entry in full.
pub struct InMemoryHotCache {
    snapshots: RwLock<HashMap<String, CachedEntry>>,
    logs: RwLock<HashMap<String, VecDeque<CachedEntry>>>,
    max_log_entries: usize,
}

impl InMemoryHotCache {
    pub fn new(max_log_entries: usize) -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
            max_log_entries,
        }
    }

    /// Number of distinct snapshot scopes currently cached.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Number of distinct bounded-log scopes currently cached.
    pub fn log_count(&self) -> usize {
        self.logs.read().len()
    }
}

impl Default for InMemoryHotCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl HotCache for InMemoryHotCache {
    async fn put_snapshot(
        &self,
        source: &str,
        scope: &Scope,
        entry: CachedEntry,
    ) -> Result<(), CacheError> {
        let key = cache_key(source, CacheKind::Snapshot, scope);
        self.snapshots.write().insert(key, entry);
        Ok(())
    }

    async fn get_snapshot(
        &self,
        source: &str,
        scope: &Scope,
    ) -> Result<Option<CachedEntry>, CacheError> {
        let key = cache_key(source, CacheKind::Snapshot, scope);
        Ok(self.snapshots.read().get(&key).cloned())
    }

    async fn append_log(
        &self,
        source: &str,
        scope: &Scope,
        entry: CachedEntry,
    ) -> Result<(), CacheError> {
        let key = cache_key(source, CacheKind::BoundedLog, scope);
        let mut logs = self.logs.write();
        let log = logs.entry(key).or_default();
        log.push_back(entry);
        while log.len() > self.max_log_entries {
            log.pop_front();
        }
        Ok(())
    }

    async fn tail_log(
        &self,
        source: &str,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<CachedEntry>, CacheError> {
        let key = cache_key(source, CacheKind::BoundedLog, scope);
        let logs = self.logs.read();
        Ok(logs
            .get(&key)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn entry(value: i64) -> CachedEntry {
        CachedEntry::new(json!({ "value": value }), Utc::now())
    }

    #[tokio::test]
    async fn snapshot_overwrites_latest() {
        let cache = InMemoryHotCache::default();
        let scope = Scope::symbol("SPY");

        cache.put_snapshot("ws:gex", &scope, entry(1)).await.unwrap();
        cache.put_snapshot("ws:gex", &scope, entry(2)).await.unwrap();

        let got = cache.get_snapshot("ws:gex", &scope).await.unwrap().unwrap();
        assert_eq!(got.payload, json!({ "value": 2 }));
        assert_eq!(cache.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn snapshot_scopes_are_independent() {
        let cache = InMemoryHotCache::default();
        cache
            .put_snapshot("ws:gex", &Scope::symbol("SPY"), entry(1))
            .await
            .unwrap();
        cache
            .put_snapshot("ws:gex", &Scope::symbol("QQQ"), entry(2))
            .await
            .unwrap();

        let spy = cache
            .get_snapshot("ws:gex", &Scope::symbol("SPY"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spy.payload, json!({ "value": 1 }));
    }

    #[tokio::test]
    async fn bounded_log_evicts_oldest() {
        let cache = InMemoryHotCache::new(3);
        let scope = Scope::symbol("SPY");

        for i in 0..5 {
            cache
                .append_log("ws:option_trades", &scope, entry(i))
                .await
                .unwrap();
        }

        let tail = cache
            .tail_log("ws:option_trades", &scope, 10)
            .await
            .unwrap();
        assert_eq!(tail.len(), 3);
        // Newest first
        assert_eq!(tail[0].payload, json!({ "value": 4 }));
        assert_eq!(tail[2].payload, json!({ "value": 2 }));
    }

    #[tokio::test]
    async fn tail_log_respects_limit() {
        let cache = InMemoryHotCache::new(100);
        let scope = Scope::global();
        for i in 0..10 {
            cache.append_log("ws:news", &scope, entry(i)).await.unwrap();
        }
        let tail = cache.tail_log("ws:news", &scope, 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].payload, json!({ "value": 9 }));
    }
}
