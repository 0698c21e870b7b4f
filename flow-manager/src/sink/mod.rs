//! Cache/archive sink.
//!
//! The single write path shared by all three acquisition loops. Every
//! observation goes to the hot cache (best effort) and the archive
//! (authoritative, one retry). A hot-cache failure never blocks the
//! archive write; an archive failure after retry is surfaced for that
//! record and isolated from the rest of the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use flow_common::cache::{CachedEntry, HotCache};
use flow_common::error::ErrorClassification;
use flow_common::record::{CacheKind, Observation};

use crate::storage::{ArchiveOutcome, ArchiveStore};

/// Outcome of one sink write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// New content; a fresh archive row was created
    Inserted,
    /// Identical content was already archived; `fetched_at` advanced
    Deduplicated,
    /// The archive rejected the record after the retry; the record is
    /// dropped with full context logged
    ArchiveFailed,
}

/// Ingestion counters, updated atomically by every path.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub written: AtomicU64,
    pub deduplicated: AtomicU64,
    pub hot_cache_errors: AtomicU64,
    pub archive_failures: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub written: u64,
    pub deduplicated: u64,
    pub hot_cache_errors: u64,
    pub archive_failures: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            written: self.written.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            hot_cache_errors: self.hot_cache_errors.load(Ordering::Relaxed),
            archive_failures: self.archive_failures.load(Ordering::Relaxed),
        }
    }
}

/// The shared cache/archive writer.
///
/// Reentrant: concurrent calls from the REST workers, the vendor stream,
/// and the rotation controller do not serialize against each other
/// except on the per-key structures inside the hot cache itself.
pub struct IngestSink {
    archive: Arc<dyn ArchiveStore>,
    hot: Arc<dyn HotCache>,
    stats: IngestStats,
    archive_retry_delay: Duration,
}

impl IngestSink {
    pub fn new(archive: Arc<dyn ArchiveStore>, hot: Arc<dyn HotCache>) -> Self {
        Self {
            archive,
            hot,
            stats: IngestStats::default(),
            archive_retry_delay: Duration::from_millis(500),
        }
    }

    /// Override the archive retry delay (tests).
    pub fn with_archive_retry_delay(mut self, delay: Duration) -> Self {
        self.archive_retry_delay = delay;
        self
    }

    /// Current counters.
    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    /// Write one observation to the hot cache and the archive.
    pub async fn write(&self, observation: Observation) -> WriteResult {
        let content_hash = observation.content_hash();

        self.write_hot(&observation).await;

        let outcome = match self.archive.upsert(&observation, &content_hash).await {
            Ok(outcome) => Some(outcome),
            Err(first) if first.is_transient() => {
                debug!(
                    source = %observation.source,
                    scope = %observation.scope,
                    "archive write failed, retrying once: {}", first
                );
                tokio::time::sleep(self.archive_retry_delay).await;
                self.archive.upsert(&observation, &content_hash).await.ok()
            }
            Err(_) => None,
        };

        match outcome {
            Some(ArchiveOutcome::Inserted) => {
                self.stats.written.fetch_add(1, Ordering::Relaxed);
                WriteResult::Inserted
            }
            Some(ArchiveOutcome::Refreshed) => {
                self.stats.deduplicated.fetch_add(1, Ordering::Relaxed);
                WriteResult::Deduplicated
            }
            None => {
                self.stats.archive_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    source = %observation.source,
                    scope = %observation.scope,
                    content_hash = %content_hash,
                    "archive write failed after retry, dropping record"
                );
                WriteResult::ArchiveFailed
            }
        }
    }

    /// Write a derived latest-value view to the hot cache only.
    ///
    /// Used for views that shadow data whose authoritative copy is
    /// archived under a different source (e.g. the per-channel snapshot
    /// written alongside a stream's bounded-log entry).
    pub async fn write_view(
        &self,
        source: &str,
        scope: &flow_common::record::Scope,
        payload: &serde_json::Value,
        fetched_at: chrono::DateTime<chrono::Utc>,
    ) {
        let entry = CachedEntry::new(payload.clone(), fetched_at);
        if let Err(e) = self.hot.put_snapshot(source, scope, entry).await {
            self.stats.hot_cache_errors.fetch_add(1, Ordering::Relaxed);
            warn!(source, scope = %scope, "view write failed: {}", e);
        }
    }

    async fn write_hot(&self, observation: &Observation) {
        let entry = CachedEntry::new(observation.payload.clone(), observation.fetched_at);
        let result = match observation.kind {
            CacheKind::Snapshot => {
                self.hot
                    .put_snapshot(&observation.source, &observation.scope, entry)
                    .await
            }
            CacheKind::BoundedLog => {
                self.hot
                    .append_log(&observation.source, &observation.scope, entry)
                    .await
            }
        };

        if let Err(e) = result {
            self.stats.hot_cache_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                source = %observation.source,
                scope = %observation.scope,
                "hot cache write failed (archive write proceeds): {}", e
            );
        }
    }
}
