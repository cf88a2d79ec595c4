//! Error types for conflict handling

use echodrive_core::domain::DomainError;
use echodrive_core::ports::DriveError;
use thiserror::Error;

/// Errors that can occur while creating or resolving conflicts
#[derive(Debug, Error)]
pub enum ConflictError {
    /// A drive operation failed
    #[error("drive error: {0}")]
    Drive(#[from] DriveError),

    /// The conflict path could not be built
    #[error("invalid conflict path: {0}")]
    InvalidPath(#[from] DomainError),

    /// Every numbered conflict name is taken
    #[error("no free conflict name for {0}")]
    NoFreeName(String),

    /// The conflict names a drive that is not part of this pair
    #[error("unknown drive '{0}'")]
    UnknownDrive(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ConflictError {
    /// Storage failures must abort the pass; everything else is per conflict
    pub fn is_storage(&self) -> bool {
        matches!(self, ConflictError::Storage(_))
    }
}
