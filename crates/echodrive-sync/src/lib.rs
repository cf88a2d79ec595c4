//! EchoDrive Sync - two-drive synchronization engine
//!
//! Provides:
//! - One-shot and continuous synchronization between two drives
//! - Conflict preservation in two-way mode, orphan pruning in echo mode
//! - Filesystem change watching with notification merging
//! - A local folder drive and an encrypting drive decorator
//!
//! ## Modules
//!
//! - [`engine`] - Pass orchestration, classification and item application
//! - [`watcher`] - `notify`-based change watcher with a debounced flush
//! - [`merge`] - Notification accumulation and the final merge
//! - [`filesystem`] - [`LocalDrive`], a drive over a local folder
//! - [`crypto_drive`] - [`CryptoDrive`], encrypting any drive's content
//! - [`scheduler`] - Continuous pass loop driven by notifications and polling
//! - [`ledger`] - Single-writer wrapper around the state store
//! - [`events`] - Progress events published by the engine

pub mod crypto_drive;
pub mod engine;
pub mod events;
pub mod filesystem;
pub mod ledger;
pub mod merge;
pub mod scheduler;
pub mod watcher;

pub use crypto_drive::CryptoDrive;
pub use engine::{ItemFailure, SyncEngine, SyncOptions, SyncReport};
pub use events::SyncEvent;
pub use filesystem::LocalDrive;
pub use ledger::StateLedger;
pub use watcher::ChangeWatcher;

use std::sync::Arc;

use echodrive_core::config::DriveConfig;
use echodrive_core::domain::DomainError;
use echodrive_core::ports::{DriveError, IDriveProxy};
use echodrive_crypto::Cryptonizer;
use thiserror::Error;

/// Build the drive described by `config`.
///
/// Encrypted drives are wrapped in a [`CryptoDrive`] using `crypto`.
///
/// # Errors
///
/// Returns `SyncError::Configuration` for an encrypted drive without a key.
pub fn drive_from_config(
    config: &DriveConfig,
    page_size: usize,
    crypto: Option<&Arc<Cryptonizer>>,
) -> Result<Arc<dyn IDriveProxy>, SyncError> {
    let local: Arc<dyn IDriveProxy> = Arc::new(LocalDrive::from_config(config, page_size));
    if !config.encrypted {
        return Ok(local);
    }
    let crypto = crypto.ok_or_else(|| {
        SyncError::Configuration(format!("drive '{}' is encrypted but no key is loaded", config.name))
    })?;
    Ok(Arc::new(CryptoDrive::new(local, Arc::clone(crypto))))
}

/// Errors that can occur during synchronization
#[derive(Debug, Error)]
pub enum SyncError {
    /// A drive operation failed
    #[error("Drive error: {0}")]
    Drive(#[from] DriveError),

    /// An observation could not be classified
    #[error("Classification failed: {0}")]
    Classification(#[from] DomainError),

    /// The state store rejected a write; the pass cannot continue
    #[error("Persistence failure: {0}")]
    Persistence(anyhow::Error),

    /// The pass was stopped
    #[error("Synchronization cancelled")]
    Cancelled,

    /// The engine was set up inconsistently
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Whether this error must abort the whole pass
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Persistence(_) | SyncError::Cancelled | SyncError::Configuration(_)
        )
    }
}

impl From<echodrive_conflict::ConflictError> for SyncError {
    fn from(err: echodrive_conflict::ConflictError) -> Self {
        use echodrive_conflict::ConflictError;
        match err {
            ConflictError::Drive(e) => SyncError::Drive(e),
            ConflictError::InvalidPath(e) => SyncError::Classification(e),
            ConflictError::Storage(e) => SyncError::Persistence(e),
            other => SyncError::Drive(DriveError::Other(anyhow::Error::new(other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn drive(encrypted: bool) -> DriveConfig {
        DriveConfig {
            name: "mirror".to_string(),
            root: PathBuf::from("/tmp/echodrive-mirror"),
            encrypted,
        }
    }

    #[test]
    fn test_encrypted_drive_requires_key() {
        let err = drive_from_config(&drive(true), 10, None).err().unwrap();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn test_drive_from_config_keeps_name() {
        let crypto = Arc::new(Cryptonizer::generate(128).unwrap());
        let plain = drive_from_config(&drive(false), 10, None).unwrap();
        let sealed = drive_from_config(&drive(true), 10, Some(&crypto)).unwrap();
        assert_eq!(plain.name(), "mirror");
        assert_eq!(sealed.name(), "mirror");
        assert!(sealed.is_local());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(SyncError::Cancelled.is_fatal());
        assert!(SyncError::Persistence(anyhow::anyhow!("disk full")).is_fatal());
        assert!(!SyncError::Drive(DriveError::NotFound("/a".into())).is_fatal());
    }
}
