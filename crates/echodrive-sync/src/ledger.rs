//! Single-writer state ledger
//!
//! File transfers within a page run concurrently and each one ends with
//! state writes. [`StateLedger`] puts every write behind one async mutex so
//! the store sees them one at a time; reads are passed straight through.

use std::sync::Arc;

use echodrive_core::domain::{Conflict, DrivePath, RemoteState};
use echodrive_core::ports::IStateRepository;
use tokio::sync::Mutex;

/// Serializing wrapper around a state repository
pub struct StateLedger {
    inner: Arc<dyn IStateRepository>,
    write_lock: Mutex<()>,
}

impl StateLedger {
    pub fn new(inner: Arc<dyn IStateRepository>) -> Self {
        Self {
            inner,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl IStateRepository for StateLedger {
    async fn get_state(&self, drive: &str, key: &str) -> anyhow::Result<Option<RemoteState>> {
        self.inner.get_state(drive, key).await
    }

    async fn upsert_state(&self, state: &RemoteState) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.inner.upsert_state(state).await
    }

    async fn delete_state(&self, drive: &str, key: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.inner.delete_state(drive, key).await
    }

    async fn list_states(&self, drive: &str) -> anyhow::Result<Vec<RemoteState>> {
        self.inner.list_states(drive).await
    }

    async fn find_state_at(
        &self,
        drive: &str,
        path: &DrivePath,
    ) -> anyhow::Result<Option<RemoteState>> {
        self.inner.find_state_at(drive, path).await
    }

    async fn get_conflict(
        &self,
        drive: &str,
        conflict_path: &DrivePath,
    ) -> anyhow::Result<Option<Conflict>> {
        self.inner.get_conflict(drive, conflict_path).await
    }

    async fn save_conflict(&self, conflict: &Conflict) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.inner.save_conflict(conflict).await
    }

    async fn delete_conflict(&self, drive: &str, conflict_path: &DrivePath) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.inner.delete_conflict(drive, conflict_path).await
    }

    async fn list_conflicts(&self) -> anyhow::Result<Vec<Conflict>> {
        self.inner.list_conflicts().await
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.inner.flush().await
    }
}
