//! In-memory archive for tests and single-process development runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use flow_common::error::DatabaseError;
use flow_common::record::{Observation, Scope};

use super::{ArchiveOutcome, ArchiveStore, ArchivedRow};

type RowKey = (String, String, String);

/// In-memory archive with the same upsert semantics as Postgres.
///
/// Can be scripted to fail a number of upserts, which the sink tests use
/// to exercise the archive retry path.
#[derive(Default)]
pub struct MemoryArchive {
    rows: Mutex<HashMap<RowKey, ArchivedRow>>,
    fail_next: Mutex<u32>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` upserts fail with a transient error.
    pub fn fail_next_upserts(&self, count: u32) {
        *self.fail_next.lock() = count;
    }

    /// Number of rows stored.
    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// Fetch a row for assertions.
    pub fn get(&self, source: &str, scope: &Scope, content_hash: &str) -> Option<ArchivedRow> {
        self.rows
            .lock()
            .get(&(
                source.to_string(),
                scope.to_string(),
                content_hash.to_string(),
            ))
            .cloned()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchive {
    async fn upsert(
        &self,
        observation: &Observation,
        content_hash: &str,
    ) -> Result<ArchiveOutcome, DatabaseError> {
        {
            let mut fail_next = self.fail_next.lock();
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(DatabaseError::Connection("scripted failure".to_string()));
            }
        }

        let key = (
            observation.source.clone(),
            observation.scope.to_string(),
            content_hash.to_string(),
        );

        let mut rows = self.rows.lock();
        match rows.get_mut(&key) {
            Some(existing) => {
                existing.fetched_at = observation.fetched_at;
                Ok(ArchiveOutcome::Refreshed)
            }
            None => {
                rows.insert(
                    key,
                    ArchivedRow {
                        source: observation.source.clone(),
                        scope: observation.scope.to_string(),
                        content_hash: content_hash.to_string(),
                        payload: observation.payload.clone(),
                        observed_at: observation.observed_at,
                        fetched_at: observation.fetched_at,
                    },
                );
                Ok(ArchiveOutcome::Inserted)
            }
        }
    }

    async fn query_range(
        &self,
        source: &str,
        scope: Option<&Scope>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ArchivedRow>, DatabaseError> {
        let scope = scope.map(|s| s.to_string());
        let mut rows: Vec<ArchivedRow> = self
            .rows
            .lock()
            .values()
            .filter(|row| row.source == source)
            .filter(|row| scope.as_ref().map(|s| &row.scope == s).unwrap_or(true))
            .filter(|row| row.fetched_at >= from && row.fetched_at < to)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_common::record::CacheKind;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_then_refresh() {
        let archive = MemoryArchive::new();
        let obs = Observation::new(
            "rest:market_tide",
            Scope::global(),
            CacheKind::Snapshot,
            json!({"tide": 1}),
        );
        let hash = obs.content_hash();

        assert_eq!(
            archive.upsert(&obs, &hash).await.unwrap(),
            ArchiveOutcome::Inserted
        );
        assert_eq!(
            archive.upsert(&obs, &hash).await.unwrap(),
            ArchiveOutcome::Refreshed
        );
        assert_eq!(archive.row_count(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_surface() {
        let archive = MemoryArchive::new();
        archive.fail_next_upserts(1);

        let obs = Observation::new(
            "rest:market_tide",
            Scope::global(),
            CacheKind::Snapshot,
            json!({"tide": 1}),
        );
        let hash = obs.content_hash();

        assert!(archive.upsert(&obs, &hash).await.is_err());
        assert!(archive.upsert(&obs, &hash).await.is_ok());
    }
}
