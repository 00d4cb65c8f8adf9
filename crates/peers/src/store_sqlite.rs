//! SQLite-backed identity store using sqlx.

use std::path::Path;

use {
    anyhow::Context,
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    },
    tracing::debug,
};

use crate::{record::IdentityRecord, store::IdentityStore};

#[derive(sqlx::FromRow)]
struct IdentityRow {
    peer_id: i64,
    access_hash: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    refreshed_at: i64,
}

impl IdentityRow {
    fn into_record(self) -> Option<IdentityRecord> {
        Some(IdentityRecord {
            id: self.peer_id,
            access_hash: self.access_hash,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            refreshed_at: DateTime::from_timestamp_millis(self.refreshed_at)?,
        })
    }
}

fn into_records(rows: Vec<IdentityRow>) -> Vec<IdentityRecord> {
    rows.into_iter().filter_map(IdentityRow::into_record).collect()
}

/// Persistence for cached access hashes.
#[derive(Debug)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

impl SqliteIdentityStore {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn open(path: &Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        crate::run_migrations(&pool).await?;
        debug!(path = %path.display(), "identity store opened");
        Ok(Self { pool })
    }

    /// Use an existing pool. Call [`crate::run_migrations`] first.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "peer_id, access_hash, username, first_name, last_name, refreshed_at";

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn load_since(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<IdentityRecord>> {
        let rows: Vec<IdentityRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM peer_identities WHERE refreshed_at >= ?"
        ))
        .bind(cutoff.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .context("failed to load identities")?;
        Ok(into_records(rows))
    }

    async fn upsert(&self, record: &IdentityRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO peer_identities (peer_id, access_hash, username, first_name, last_name, refreshed_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(peer_id) DO UPDATE SET
                access_hash = excluded.access_hash,
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                refreshed_at = excluded.refreshed_at",
        )
        .bind(record.id)
        .bind(record.access_hash)
        .bind(&record.username)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(record.refreshed_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save identity {}", record.id))?;
        Ok(())
    }

    async fn delete(&self, peer_id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM peer_identities WHERE peer_id = ?")
            .bind(peer_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM peer_identities WHERE refreshed_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list(&self) -> anyhow::Result<Vec<IdentityRecord>> {
        let rows: Vec<IdentityRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM peer_identities ORDER BY refreshed_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(into_records(rows))
    }

    async fn clear(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM peer_identities")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
