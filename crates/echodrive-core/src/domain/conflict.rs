//! Conflict records
//!
//! A conflict exists when a two-way transfer finds that the target drive was
//! modified independently. The foreign version is preserved next to the
//! canonical file under a conflict-copy name, and a [`Conflict`] record links
//! the two until the user deletes the copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::path::DrivePath;

/// Open conflict between a canonical file and its conflict copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Drive holding both the canonical file and the copy
    pub drive: String,
    pub original_path: DrivePath,
    /// Unique per drive
    pub conflict_path: DrivePath,
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    #[must_use]
    pub fn new(drive: impl Into<String>, original_path: DrivePath, conflict_path: DrivePath) -> Self {
        Self {
            drive: drive.into(),
            original_path,
            conflict_path,
            detected_at: Utc::now(),
        }
    }
}
