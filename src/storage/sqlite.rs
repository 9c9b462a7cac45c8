use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{Backend, MIGRATION_001_KV_RECORDS, Mutation, StoreError, StoreResult, Updater};

/// How many lost compare-and-swap races `update` tolerates before giving up.
pub const DEFAULT_CAS_ATTEMPTS: u32 = 16;

/// SQLite-backed store. Every write stamps the record with a fresh revision
/// drawn from a counter, so `update` can detect a concurrent writer (in this
/// process or another one sharing the file) and re-run the updater.
pub struct SqliteBackend {
    pool: SqlitePool,
    cas_attempts: u32,
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

impl SqliteBackend {
    /// Create a new backend with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cas_attempts: DEFAULT_CAS_ATTEMPTS,
        }
    }

    pub fn with_cas_attempts(mut self, attempts: u32) -> Self {
        self.cas_attempts = attempts.max(1);
        self
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_KV_RECORDS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let backend = Self::connect(database_url).await?;
        backend.migrate().await?;
        Ok(backend)
    }

    /// Get the next revision number and increment the counter.
    async fn next_revision(&self) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            UPDATE kv_sequence
            SET value = value + 1
            WHERE name = 'revision'
            RETURNING value
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(row.get("value"))
    }

    async fn read(&self, key: &str) -> StoreResult<Option<(String, i64)>> {
        let row = sqlx::query("SELECT value, revision FROM kv_records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(row.map(|row| (row.get("value"), row.get("revision"))))
    }

    /// Apply one mutation against the revision the updater saw.
    /// Returns false if another writer got there first.
    async fn apply(&self, key: &str, seen: Option<i64>, mutation: Mutation) -> StoreResult<bool> {
        let now = Utc::now().to_rfc3339();

        let affected = match (mutation, seen) {
            (Mutation::Keep, _) | (Mutation::Remove, None) => return Ok(true),
            (Mutation::Remove, Some(revision)) => {
                sqlx::query("DELETE FROM kv_records WHERE key = ? AND revision = ?")
                    .bind(key)
                    .bind(revision)
                    .execute(&self.pool)
                    .await
                    .map_err(unavailable)?
                    .rows_affected()
            }
            (Mutation::Put(value), Some(revision)) => {
                let next = self.next_revision().await?;
                sqlx::query(
                    r#"
                    UPDATE kv_records
                    SET value = ?, revision = ?, updated_at = ?
                    WHERE key = ? AND revision = ?
                    "#,
                )
                .bind(&value)
                .bind(next)
                .bind(&now)
                .bind(key)
                .bind(revision)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?
                .rows_affected()
            }
            (Mutation::Put(value), None) => {
                let next = self.next_revision().await?;
                sqlx::query(
                    r#"
                    INSERT INTO kv_records (key, value, revision, updated_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(key) DO NOTHING
                    "#,
                )
                .bind(key)
                .bind(&value)
                .bind(next)
                .bind(&now)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?
                .rows_affected()
            }
        };

        Ok(affected == 1)
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read(key).await?.map(|(value, _)| value))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let revision = self.next_revision().await?;
        sqlx::query(
            r#"
            INSERT INTO kv_records (key, value, revision, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                revision = excluded.revision,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(revision)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn update(&self, key: &str, updater: &mut Updater<'_>) -> StoreResult<()> {
        for attempt in 1..=self.cas_attempts {
            let (current, seen) = match self.read(key).await? {
                Some((value, revision)) => (Some(value), Some(revision)),
                None => (None, None),
            };

            if self.apply(key, seen, updater(current)).await? {
                return Ok(());
            }
            debug!(key, attempt, "Concurrent write detected, re-running update");
        }

        Err(StoreError::Unavailable(format!(
            "Update of {} lost {} consecutive races",
            key, self.cas_attempts
        )))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM kv_records WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }
}
