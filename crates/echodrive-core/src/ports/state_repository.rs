//! State repository port (driven/secondary port)
//!
//! Persists the last known [`RemoteState`] of every item per drive, and the
//! open [`Conflict`] records.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   and don't need domain-level classification.
//! - Writes become durable no later than the next [`IStateRepository::flush`];
//!   the sync engine flushes once per processed delta page.
//! - Callers that write from several tasks must serialize their writes;
//!   implementations are not required to order concurrent upserts.

use crate::domain::{Conflict, DrivePath, RemoteState};

/// Port for item state and conflict persistence
#[async_trait::async_trait]
pub trait IStateRepository: Send + Sync {
    // --- item state ---

    /// Get the state stored under `key` for `drive`
    async fn get_state(&self, drive: &str, key: &str) -> anyhow::Result<Option<RemoteState>>;

    /// Insert or replace the state at `(state.drive, state.key)`
    async fn upsert_state(&self, state: &RemoteState) -> anyhow::Result<()>;

    /// Remove the state at `(drive, key)`; absent keys are not an error
    async fn delete_state(&self, drive: &str, key: &str) -> anyhow::Result<()>;

    /// All states recorded for `drive`
    async fn list_states(&self, drive: &str) -> anyhow::Result<Vec<RemoteState>>;

    /// A state recorded for `drive` at `path`, whatever its key.
    ///
    /// Id-addressed drives may hold a stale binding at a path that a newer
    /// item now occupies; this finds it.
    async fn find_state_at(
        &self,
        drive: &str,
        path: &DrivePath,
    ) -> anyhow::Result<Option<RemoteState>> {
        Ok(self
            .list_states(drive)
            .await?
            .into_iter()
            .find(|s| &s.path == path))
    }

    // --- conflicts ---

    async fn get_conflict(
        &self,
        drive: &str,
        conflict_path: &DrivePath,
    ) -> anyhow::Result<Option<Conflict>>;

    /// Insert or replace the conflict keyed by `(drive, conflict_path)`
    async fn save_conflict(&self, conflict: &Conflict) -> anyhow::Result<()>;

    async fn delete_conflict(&self, drive: &str, conflict_path: &DrivePath) -> anyhow::Result<()>;

    async fn list_conflicts(&self) -> anyhow::Result<Vec<Conflict>>;

    // --- durability ---

    /// Checkpoint everything written so far
    async fn flush(&self) -> anyhow::Result<()>;
}
