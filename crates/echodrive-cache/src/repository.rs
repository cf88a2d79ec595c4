//! SQLite implementation of IStateRepository
//!
//! ## Type Mapping
//!
//! | Domain Type     | SQL Type | Strategy                                   |
//! |-----------------|----------|--------------------------------------------|
//! | DrivePath       | TEXT     | `.as_str()` / `DrivePath::new()`           |
//! | ItemKind        | TEXT     | `.as_str()` / `ItemKind::parse()`          |
//! | DateTime<Utc>   | TEXT     | RFC 3339 via `to_rfc3339()`                |
//! | u64 size        | INTEGER  | stored as i64                              |
//! | bool            | INTEGER  | 0 / 1                                      |

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use echodrive_core::domain::{Conflict, DrivePath, ItemKind, RemoteState};
use echodrive_core::ports::IStateRepository;

use crate::CacheError;

/// SQLite-backed state and conflict store
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::InvalidRow(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn parse_path(s: &str) -> Result<DrivePath, CacheError> {
    DrivePath::new(s)
        .map_err(|e| CacheError::InvalidRow(format!("Invalid stored path '{}': {}", s, e)))
}

fn state_from_row(row: &SqliteRow) -> Result<RemoteState, CacheError> {
    let path: String = row.get("path");
    let kind: String = row.get("kind");
    let last_modified: String = row.get("last_modified");
    let size: i64 = row.get("size_bytes");
    let is_local: i64 = row.get("is_local");

    Ok(RemoteState {
        drive: row.get("drive"),
        key: row.get("key"),
        id: row.get("id"),
        path: parse_path(&path)?,
        content_hash: row.get("content_hash"),
        size: u64::try_from(size)
            .map_err(|_| CacheError::InvalidRow(format!("Negative size {}", size)))?,
        kind: ItemKind::parse(&kind)
            .ok_or_else(|| CacheError::InvalidRow(format!("Unknown item kind: {}", kind)))?,
        last_modified: parse_datetime(&last_modified)?,
        is_local: is_local != 0,
    })
}

fn conflict_from_row(row: &SqliteRow) -> Result<Conflict, CacheError> {
    let original_path: String = row.get("original_path");
    let conflict_path: String = row.get("conflict_path");
    let detected_at: String = row.get("detected_at");

    Ok(Conflict {
        drive: row.get("drive"),
        original_path: parse_path(&original_path)?,
        conflict_path: parse_path(&conflict_path)?,
        detected_at: parse_datetime(&detected_at)?,
    })
}

// ============================================================================
// IStateRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateRepository for SqliteStateRepository {
    async fn get_state(&self, drive: &str, key: &str) -> anyhow::Result<Option<RemoteState>> {
        let row = sqlx::query("SELECT * FROM remote_states WHERE drive = ? AND key = ?")
            .bind(drive)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(state_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn upsert_state(&self, state: &RemoteState) -> anyhow::Result<()> {
        let size = i64::try_from(state.size)
            .map_err(|_| anyhow::anyhow!("Size {} does not fit the store", state.size))?;

        sqlx::query(
            "INSERT OR REPLACE INTO remote_states \
             (drive, key, id, path, content_hash, size_bytes, kind, last_modified, is_local) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&state.drive)
        .bind(&state.key)
        .bind(&state.id)
        .bind(state.path.as_str())
        .bind(&state.content_hash)
        .bind(size)
        .bind(state.kind.as_str())
        .bind(state.last_modified.to_rfc3339())
        .bind(i64::from(state.is_local))
        .execute(&self.pool)
        .await?;

        tracing::trace!(drive = %state.drive, key = %state.key, "Upserted state");
        Ok(())
    }

    async fn delete_state(&self, drive: &str, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM remote_states WHERE drive = ? AND key = ?")
            .bind(drive)
            .bind(key)
            .execute(&self.pool)
            .await?;

        tracing::trace!(drive, key, "Deleted state");
        Ok(())
    }

    async fn list_states(&self, drive: &str) -> anyhow::Result<Vec<RemoteState>> {
        let rows = sqlx::query("SELECT * FROM remote_states WHERE drive = ? ORDER BY path")
            .bind(drive)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| state_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn find_state_at(
        &self,
        drive: &str,
        path: &DrivePath,
    ) -> anyhow::Result<Option<RemoteState>> {
        // Served by idx_remote_states_path
        let row = sqlx::query(
            "SELECT * FROM remote_states WHERE drive = ? AND path = ? ORDER BY key LIMIT 1",
        )
        .bind(drive)
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(state_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_conflict(
        &self,
        drive: &str,
        conflict_path: &DrivePath,
    ) -> anyhow::Result<Option<Conflict>> {
        let row = sqlx::query("SELECT * FROM conflicts WHERE drive = ? AND conflict_path = ?")
            .bind(drive)
            .bind(conflict_path.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(conflict_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn save_conflict(&self, conflict: &Conflict) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO conflicts \
             (drive, conflict_path, original_path, detected_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&conflict.drive)
        .bind(conflict.conflict_path.as_str())
        .bind(conflict.original_path.as_str())
        .bind(conflict.detected_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(
            drive = %conflict.drive,
            conflict_path = %conflict.conflict_path,
            "Saved conflict"
        );
        Ok(())
    }

    async fn delete_conflict(&self, drive: &str, conflict_path: &DrivePath) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM conflicts WHERE drive = ? AND conflict_path = ?")
            .bind(drive)
            .bind(conflict_path.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_conflicts(&self) -> anyhow::Result<Vec<Conflict>> {
        let rows = sqlx::query("SELECT * FROM conflicts ORDER BY detected_at, conflict_path")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| conflict_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn flush(&self) -> anyhow::Result<()> {
        // No-op outside WAL mode (in-memory databases)
        sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
