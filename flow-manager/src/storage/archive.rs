//! PostgreSQL archive implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};

use flow_common::error::DatabaseError;
use flow_common::record::{Observation, Scope};

use crate::config::DatabaseSettings;

use super::{ArchiveOutcome, ArchiveStore, ArchivedRow};

/// PostgreSQL-backed archive.
pub struct PostgresArchive {
    pool: PgPool,
}

impl PostgresArchive {
    /// Create an archive over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool from settings.
    pub async fn from_settings(settings: &DatabaseSettings) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&settings.url)
            .await
            .map_err(map_sqlx)?;

        Ok(Self::new(pool))
    }

    /// Get the database pool reference.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the archive schema if it does not exist.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        info!("running archive migrations...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archive_observations (
                source TEXT NOT NULL,
                scope TEXT NOT NULL,
                content_hash CHAR(64) NOT NULL,
                payload JSONB NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL,
                fetched_at TIMESTAMPTZ NOT NULL,
                ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_archive_observations_identity
            ON archive_observations (source, scope, content_hash)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_archive_observations_fetched
            ON archive_observations (source, scope, fetched_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        info!("archive migrations completed");
        Ok(())
    }
}

#[async_trait]
impl ArchiveStore for PostgresArchive {
    async fn upsert(
        &self,
        observation: &Observation,
        content_hash: &str,
    ) -> Result<ArchiveOutcome, DatabaseError> {
        let row = sqlx::query(
            r#"
            INSERT INTO archive_observations (
                source, scope, content_hash, payload, observed_at, fetched_at
            ) VALUES ($1, $2, $3, $4::jsonb, $5, $6)
            ON CONFLICT (source, scope, content_hash)
            DO UPDATE SET fetched_at = EXCLUDED.fetched_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&observation.source)
        .bind(observation.scope.to_string())
        .bind(content_hash)
        .bind(observation.payload.to_string())
        .bind(observation.observed_at)
        .bind(observation.fetched_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let inserted: bool = row.try_get("inserted").map_err(map_sqlx)?;
        debug!(
            source = %observation.source,
            scope = %observation.scope,
            inserted,
            "archive upsert"
        );

        Ok(if inserted {
            ArchiveOutcome::Inserted
        } else {
            ArchiveOutcome::Refreshed
        })
    }

    async fn query_range(
        &self,
        source: &str,
        scope: Option<&Scope>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ArchivedRow>, DatabaseError> {
        let rows = match scope {
            Some(scope) => {
                sqlx::query(
                    r#"
                    SELECT source, scope, content_hash, payload::text AS payload,
                           observed_at, fetched_at
                    FROM archive_observations
                    WHERE source = $1 AND scope = $2
                      AND fetched_at >= $3 AND fetched_at < $4
                    ORDER BY fetched_at DESC
                    LIMIT $5
                    "#,
                )
                .bind(source)
                .bind(scope.to_string())
                .bind(from)
                .bind(to)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT source, scope, content_hash, payload::text AS payload,
                           observed_at, fetched_at
                    FROM archive_observations
                    WHERE source = $1
                      AND fetched_at >= $2 AND fetched_at < $3
                    ORDER BY fetched_at DESC
                    LIMIT $4
                    "#,
                )
                .bind(source)
                .bind(from)
                .bind(to)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_sqlx)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload").map_err(map_sqlx)?;
            let payload = serde_json::from_str(&payload)
                .map_err(|e| DatabaseError::Query(format!("corrupt payload column: {}", e)))?;
            out.push(ArchivedRow {
                source: row.try_get("source").map_err(map_sqlx)?,
                scope: row.try_get("scope").map_err(map_sqlx)?,
                content_hash: {
                    let hash: String = row.try_get("content_hash").map_err(map_sqlx)?;
                    hash.trim_end().to_string()
                },
                payload,
                observed_at: row.try_get("observed_at").map_err(map_sqlx)?,
                fetched_at: row.try_get("fetched_at").map_err(map_sqlx)?,
            });
        }
        Ok(out)
    }
}

fn map_sqlx(err: sqlx::Error) -> DatabaseError {
    match &err {
        sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
        sqlx::Error::Io(_) => DatabaseError::Connection(err.to_string()),
        _ => DatabaseError::Query(err.to_string()),
    }
}
