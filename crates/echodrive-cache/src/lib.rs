//! EchoDrive Cache - Local state persistence
//!
//! Two tables back the `IStateRepository` port from `echodrive-core`:
//! `remote_states` holds the last transferred state of every item, keyed by
//! drive and item key, and `conflicts` holds the open conflict records.
//! Writers are not coordinated here; the sync engine puts a single-writer
//! ledger in front of the repository.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use echodrive_cache::{DatabasePool, SqliteStateRepository};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/echodrive/state.db")).await?;
//! let repo = SqliteStateRepository::new(pool.pool().clone());
//! // Hand `repo` to the engine as its state store
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteStateRepository;

use std::path::PathBuf;

/// Errors raised by the SQLite state store
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The directory holding the database file could not be created
    #[error("Cannot create state directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// SQLite refused to open the database
    #[error("Cannot open state store: {0}")]
    Open(#[source] sqlx::Error),

    /// The schema could not be applied
    #[error("Schema migration failed: {0}")]
    Migration(#[source] sqlx::Error),

    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A stored row does not map back to a domain value
    #[error("Invalid stored row: {0}")]
    InvalidRow(String),
}
