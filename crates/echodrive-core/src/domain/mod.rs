//! Domain types and pure business rules
//!
//! - Normalized drive paths and the ancestor predicate
//! - Transient drive items and content handles
//! - Persisted per-drive state and change classification
//! - Conflict records and change notifications
//! - Domain-specific error types

pub mod conflict;
pub mod errors;
pub mod item;
pub mod mode;
pub mod notification;
pub mod path;
pub mod state;

// Re-export commonly used types
pub use conflict::Conflict;
pub use errors::DomainError;
pub use item::{truncate_to_seconds, ContentStream, DownloadLocator, DriveItem, ItemKind};
pub use mode::SyncMode;
pub use notification::{ChangeScope, DriveChangedNotification};
pub use path::DrivePath;
pub use state::{classify, ChangeClassification, RemoteState};
