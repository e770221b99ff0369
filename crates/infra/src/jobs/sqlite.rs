//! SQLite-backed job store.
//!
//! One row per job. Lookup columns (`state`, timestamps) sit next to the full
//! record serialized as JSON, so schema changes to `Job` do not need a
//! migration. Timestamps are written as fixed-width RFC 3339 strings and
//! compare correctly as text.
//!
//! The compare-and-swap in [`JobStore::update`] is a single
//! `UPDATE ... WHERE id = ? AND state = ?`; zero affected rows means another
//! writer got there first (or the job does not exist).

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use demusify_core::{Job, JobId, JobState};

use super::store::{JobStore, JobStoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id          TEXT PRIMARY KEY NOT NULL,
        state       TEXT NOT NULL,
        record      TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS jobs_state_updated_idx ON jobs (state, updated_at)",
    "CREATE INDEX IF NOT EXISTS jobs_created_idx ON jobs (created_at)",
];

/// SQLite job store.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, JobStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        info!(path = %path.display(), "sqlite job store opened");
        Self::with_pool(pool).await
    }

    /// Private in-memory database; for tests and `JOB_STORE=memory` style runs.
    pub async fn in_memory() -> Result<Self, JobStoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| map_sqlx_error("connect", e))?;
        // Every connection to :memory: is its own database; keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if missing.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn current_state(&self, id: JobId) -> Result<Option<JobState>, JobStoreError> {
        let row = sqlx::query("SELECT state FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_state", e))?;
        row.map(|row| {
            let state: String = row
                .try_get("state")
                .map_err(|e| map_sqlx_error("current_state", e))?;
            JobState::parse(&state)
                .ok_or_else(|| JobStoreError::Storage(format!("unknown job state '{state}'")))
        })
        .transpose()
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn encode(job: &Job) -> Result<String, JobStoreError> {
    serde_json::to_string(job).map_err(|e| JobStoreError::Storage(format!("encode job: {e}")))
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Job, JobStoreError> {
    let record: String = row
        .try_get("record")
        .map_err(|e| map_sqlx_error("decode", e))?;
    serde_json::from_str(&record).map_err(|e| JobStoreError::Storage(format!("decode job: {e}")))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            "INSERT INTO jobs (id, state, record, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.state.as_str())
        .bind(encode(job)?)
        .bind(timestamp(job.created_at))
        .bind(timestamp(job.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(JobStoreError::AlreadyExists(job.id)),
            Err(e) => Err(map_sqlx_error("create", e)),
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query("SELECT record FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(decode).transpose()
    }

    async fn update(&self, job: &Job, expected: JobState) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?, record = ?, updated_at = ? WHERE id = ? AND state = ?",
        )
        .bind(job.state.as_str())
        .bind(encode(job)?)
        .bind(timestamp(job.updated_at))
        .bind(job.id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.current_state(job.id).await? {
            None => Err(JobStoreError::NotFound(job.id)),
            Some(found) => {
                debug!(job_id = %job.id, %expected, %found, "compare-and-swap lost");
                Err(JobStoreError::StateConflict {
                    id: job.id,
                    expected,
                    found,
                })
            }
        }
    }

    async fn delete(&self, id: JobId, expected: JobState) -> Result<(), JobStoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND state = ?")
            .bind(id.to_string())
            .bind(expected.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.current_state(id).await? {
            None => Err(JobStoreError::NotFound(id)),
            Some(found) => Err(JobStoreError::StateConflict {
                id,
                expected,
                found,
            }),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query("SELECT record FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?")
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list", e))?;
        rows.iter().map(decode).collect()
    }

    async fn list_stale(
        &self,
        state: JobState,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(
            "SELECT record FROM jobs WHERE state = ? AND updated_at < ? ORDER BY updated_at ASC",
        )
        .bind(state.as_str())
        .bind(timestamp(older_than))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stale", e))?;
        rows.iter().map(decode).collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => JobStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
