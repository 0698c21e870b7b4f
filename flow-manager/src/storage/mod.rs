//! Durable archive storage.
//!
//! The archive is the authoritative store: every distinct observation is
//! kept exactly once, keyed by `(source, scope, content_hash)`. Repeated
//! identical payloads only advance `fetched_at`.

mod archive;
mod memory;

pub use archive::PostgresArchive;
pub use memory::MemoryArchive;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use flow_common::error::DatabaseError;
use flow_common::record::{Observation, Scope};

/// Outcome of an archive upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// A new row was inserted
    Inserted,
    /// An identical row existed; only `fetched_at` advanced
    Refreshed,
}

/// One archived observation row.
#[derive(Debug, Clone)]
pub struct ArchivedRow {
    pub source: String,
    pub scope: String,
    pub content_hash: String,
    pub payload: Value,
    pub observed_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// Archive store seam shared by the sink and the read interface.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Insert the observation or, if an identical row exists, advance
    /// its `fetched_at`.
    async fn upsert(
        &self,
        observation: &Observation,
        content_hash: &str,
    ) -> Result<ArchiveOutcome, DatabaseError>;

    /// Range query by source, optional scope, and fetch-time window.
    async fn query_range(
        &self,
        source: &str,
        scope: Option<&Scope>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ArchivedRow>, DatabaseError>;
}
