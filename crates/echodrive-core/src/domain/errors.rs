//! Domain error types
//!
//! Validation failures for paths, and the classification errors that a sync
//! pass treats as fatal for the offending item.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The item is neither a file nor a folder
    #[error("Unsupported item kind: {0}")]
    UnsupportedItemKind(String),

    /// Persisted and observed records share a key but disagree on identity
    #[error("Identity violation at {path}: stored {stored}, observed {observed}")]
    IdentityViolation {
        /// Path of the observed item
        path: String,
        /// Identity recorded in the persisted state
        stored: String,
        /// Identity reported by the drive
        observed: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
