//! Scoped change notifications produced by the change watcher

use std::fmt;

use serde::{Deserialize, Serialize};

use super::path::DrivePath;

/// How much of a folder a notification covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeScope {
    /// The folder's direct contents only
    SelfOnly,
    /// The folder and its whole subtree
    Descendants,
}

/// A folder whose contents changed, with the extent of the change
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriveChangedNotification {
    pub folder_path: DrivePath,
    pub scope: ChangeScope,
}

impl DriveChangedNotification {
    #[must_use]
    pub fn new(folder_path: DrivePath, scope: ChangeScope) -> Self {
        Self { folder_path, scope }
    }

    #[must_use]
    pub fn self_only(folder_path: DrivePath) -> Self {
        Self::new(folder_path, ChangeScope::SelfOnly)
    }

    #[must_use]
    pub fn descendants(folder_path: DrivePath) -> Self {
        Self::new(folder_path, ChangeScope::Descendants)
    }
}

impl fmt::Display for DriveChangedNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            ChangeScope::SelfOnly => write!(f, "{}", self.folder_path),
            ChangeScope::Descendants => write!(f, "{}/**", self.folder_path),
        }
    }
}
