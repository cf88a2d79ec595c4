//! Database connection pool management
//!
//! Wraps SQLx's `SqlitePool`, creating the database directory, enabling WAL
//! and applying the schema on open. [`DatabasePool::in_memory`] is used by
//! tests.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::CacheError;

const SCHEMA: &str = include_str!("migrations/20261019_initial.sql");

/// Pool of SQLite connections for the state store
///
/// File databases use WAL, up to 5 connections and a 5-second busy timeout.
/// In-memory databases use a single connection, since each connection would
/// otherwise see its own empty database.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if needed) the database at `db_path` and migrate it
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Directory` or `CacheError::Open` if the file
    /// cannot be opened, and `CacheError::Migration` if the schema cannot be
    /// applied.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(CacheError::Open)?;

        Self::run_migrations(&pool).await?;

        tracing::debug!(path = %db_path.display(), "State store opened");

        Ok(Self { pool })
    }

    /// In-memory database for tests
    ///
    /// # Errors
    ///
    /// Same as [`DatabasePool::new`].
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(CacheError::Open)?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the schema; every statement is `IF NOT EXISTS`
    async fn run_migrations(pool: &SqlitePool) -> Result<(), CacheError> {
        sqlx::raw_sql(SCHEMA)
            .execute(pool)
            .await
            .map_err(CacheError::Migration)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_database_is_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");

        let pool = DatabasePool::new(&path).await.unwrap();
        assert!(path.exists());

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(pool.pool())
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = DatabasePool::in_memory().await.unwrap();
        DatabasePool::run_migrations(pool.pool()).await.unwrap();
    }
}
