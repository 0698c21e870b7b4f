//! Redis-backed hot cache.
//!
//! Snapshots live in Redis hashes (`payload` + `fetched_at` fields) so a
//! single HSET replaces the value atomically. Bounded logs use
//! LPUSH/LTRIM-capped lists, newest at the head.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{Client as RedisClient, Commands, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{cache_key, CachedEntry, HotCache};
use crate::error::CacheError;
use crate::record::{CacheKind, Scope};

/// Redis hot cache.
pub struct RedisHotCache {
    #[allow(dead_code)] // Keep client alive to maintain connection
    client: RedisClient,
    connection: Arc<Mutex<Connection>>,
    max_log_entries: usize,
    log_ttl_secs: Option<u64>,
}

impl RedisHotCache {
    /// Connect to Redis at the given URL.
    pub fn connect(
        redis_url: &str,
        max_log_entries: usize,
        log_ttl_secs: Option<u64>,
    ) -> Result<Self, CacheError> {
        let client = RedisClient::open(redis_url)
            .map_err(|e| CacheError::Connection(format!("failed to create Redis client: {}", e)))?;

        let connection = client
            .get_connection()
            .map_err(|e| CacheError::Connection(format!("failed to connect to Redis: {}", e)))?;

        debug!("Connected to Redis at {}", redis_url);

        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(connection)),
            max_log_entries,
            log_ttl_secs,
        })
    }
}

#[async_trait]
impl HotCache for RedisHotCache {
    async fn put_snapshot(
        &self,
        source: &str,
        scope: &Scope,
        entry: CachedEntry,
    ) -> Result<(), CacheError> {
        let key = cache_key(source, CacheKind::Snapshot, scope);
        let payload = entry.payload.to_string();
        let fetched_at = entry.fetched_at.to_rfc3339();

        let mut conn = self.connection.lock().await;
        let _: () = conn
            .hset_multiple(
                &key,
                &[
                    ("payload", payload.as_str()),
                    ("fetched_at", fetched_at.as_str()),
                ],
            )
            .map_err(|e| CacheError::Write(format!("Redis HSET failed for {}: {}", key, e)))?;
        Ok(())
    }

    async fn get_snapshot(
        &self,
        source: &str,
        scope: &Scope,
    ) -> Result<Option<CachedEntry>, CacheError> {
        let key = cache_key(source, CacheKind::Snapshot, scope);
        let mut conn = self.connection.lock().await;

        let fields: Vec<Option<String>> = conn
            .hget(&key, &["payload", "fetched_at"])
            .map_err(|e| CacheError::Read(format!("Redis HGET failed for {}: {}", key, e)))?;

        let (payload, fetched_at) = match (fields.first(), fields.get(1)) {
            (Some(Some(payload)), Some(Some(fetched_at))) => (payload.clone(), fetched_at.clone()),
            _ => return Ok(None),
        };

        let payload = serde_json::from_str(&payload)
            .map_err(|e| CacheError::Serialization(format!("bad payload in {}: {}", key, e)))?;
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
            .map_err(|e| CacheError::Serialization(format!("bad timestamp in {}: {}", key, e)))?
            .with_timezone(&Utc);

        Ok(Some(CachedEntry::new(payload, fetched_at)))
    }

    async fn append_log(
        &self,
        source: &str,
        scope: &Scope,
        entry: CachedEntry,
    ) -> Result<(), CacheError> {
        let key = cache_key(source, CacheKind::BoundedLog, scope);
        let serialized = serde_json::to_string(&entry)
            .map_err(|e| CacheError::Serialization(format!("failed to serialize entry: {}", e)))?;

        let mut conn = self.connection.lock().await;

        let _: () = conn
            .lpush(&key, &serialized)
            .map_err(|e| CacheError::Write(format!("Redis LPUSH failed for {}: {}", key, e)))?;

        let _: () = conn
            .ltrim(&key, 0, self.max_log_entries as isize - 1)
            .map_err(|e| CacheError::Write(format!("Redis LTRIM failed for {}: {}", key, e)))?;

        if let Some(ttl) = self.log_ttl_secs {
            let _: () = conn
                .expire(&key, ttl as i64)
                .map_err(|e| CacheError::Write(format!("Redis EXPIRE failed for {}: {}", key, e)))?;
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
        let mut conn = self.connection.lock().await;

        let raw: Vec<String> = conn
            .lrange(&key, 0, limit as isize - 1)
            .map_err(|e| CacheError::Read(format!("Redis LRANGE failed for {}: {}", key, e)))?;

        let mut entries = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str::<CachedEntry>(&item) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // Skip corrupt entries rather than failing the whole read
                    warn!("Failed to deserialize cached entry from {}: {}", key, e);
                }
            }
        }

        Ok(entries)
    }
}
