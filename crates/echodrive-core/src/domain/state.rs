//! Persisted item state and change classification
//!
//! ## Design Notes
//!
//! A [`RemoteState`] is the last snapshot of an item that was successfully
//! transferred, namespaced by the drive that holds it. There is at most one
//! state per `(drive, key)`. [`classify`] compares such a snapshot with a fresh
//! observation from the same drive and decides what a pass must do; it is a
//! pure function and is never persisted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::item::{truncate_to_seconds, DriveItem, ItemKind};
use super::path::DrivePath;

/// Snapshot of an item as of its last successful transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteState {
    /// Name of the drive this state belongs to
    pub drive: String,
    /// Drive id when known, path otherwise
    pub key: String,
    /// Drive-assigned id (empty for path-addressed drives)
    pub id: String,
    pub path: DrivePath,
    pub content_hash: String,
    pub size: u64,
    pub kind: ItemKind,
    pub last_modified: DateTime<Utc>,
    pub is_local: bool,
}

impl RemoteState {
    /// Capture the state of `item` as held by `drive`
    #[must_use]
    pub fn capture(
        drive: impl Into<String>,
        item: &DriveItem,
        content_hash: impl Into<String>,
        is_local: bool,
    ) -> Self {
        Self {
            drive: drive.into(),
            key: item.key(),
            id: item.id.clone(),
            path: item.path.clone(),
            content_hash: content_hash.into(),
            size: item.size,
            kind: item.kind,
            last_modified: truncate_to_seconds(item.last_modified),
            is_local,
        }
    }

    /// Rebuild the item this state describes
    #[must_use]
    pub fn to_item(&self) -> DriveItem {
        DriveItem::new(self.path.clone(), self.kind, self.size, self.last_modified)
            .with_id(self.id.clone())
    }
}

/// What a pass has to do with an observed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClassification {
    None,
    Created,
    Changed,
    Deleted,
    Renamed,
}

impl fmt::Display for ChangeClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeClassification::None => "none",
            ChangeClassification::Created => "created",
            ChangeClassification::Changed => "changed",
            ChangeClassification::Deleted => "deleted",
            ChangeClassification::Renamed => "renamed",
        };
        f.write_str(name)
    }
}

/// Classify an observation against the previously persisted state.
///
/// # Errors
///
/// - `DomainError::UnsupportedItemKind` for items that are neither file nor folder
/// - `DomainError::IdentityViolation` when the stored and observed records share
///   a key but disagree on id or kind
pub fn classify(
    old: Option<&RemoteState>,
    new: &DriveItem,
) -> Result<ChangeClassification, DomainError> {
    if new.kind == ItemKind::Unsupported {
        return Err(DomainError::UnsupportedItemKind(new.path.to_string()));
    }

    if new.deleted {
        return Ok(match old {
            Some(_) => ChangeClassification::Deleted,
            None => ChangeClassification::None,
        });
    }

    let Some(old) = old else {
        return Ok(ChangeClassification::Created);
    };

    if old.id != new.id {
        return Err(DomainError::IdentityViolation {
            path: new.path.to_string(),
            stored: old.id.clone(),
            observed: new.id.clone(),
        });
    }

    if old.kind != new.kind {
        return Err(DomainError::IdentityViolation {
            path: new.path.to_string(),
            stored: old.kind.to_string(),
            observed: new.kind.to_string(),
        });
    }

    if old.path != new.path {
        return Ok(ChangeClassification::Renamed);
    }

    if new.kind == ItemKind::File
        && (old.size != new.size
            || truncate_to_seconds(old.last_modified) != truncate_to_seconds(new.last_modified))
    {
        return Ok(ChangeClassification::Changed);
    }

    Ok(ChangeClassification::None)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn file(path: &str, size: u64, secs: i64) -> DriveItem {
        DriveItem::file(DrivePath::new(path).unwrap(), size, at(secs))
    }

    fn state_of(item: &DriveItem) -> RemoteState {
        RemoteState::capture("local", item, "hash", true)
    }

    #[test]
    fn test_classify_created_without_state() {
        let item = file("/a.txt", 1, 10);
        assert_eq!(classify(None, &item), Ok(ChangeClassification::Created));
    }

    #[test]
    fn test_classify_unchanged() {
        let item = file("/a.txt", 1, 10);
        let state = state_of(&item);
        assert_eq!(classify(Some(&state), &item), Ok(ChangeClassification::None));
    }

    #[test]
    fn test_classify_changed_on_size_or_time() {
        let item = file("/a.txt", 1, 10);
        let state = state_of(&item);
        assert_eq!(
            classify(Some(&state), &file("/a.txt", 2, 10)),
            Ok(ChangeClassification::Changed)
        );
        assert_eq!(
            classify(Some(&state), &file("/a.txt", 1, 11)),
            Ok(ChangeClassification::Changed)
        );
    }

    #[test]
    fn test_classify_ignores_subsecond_noise() {
        let item = file("/a.txt", 1, 10);
        let state = state_of(&item);
        let mut noisy = item.clone();
        noisy.last_modified = Utc.timestamp_opt(10, 500_000_000).single().unwrap();
        assert_eq!(classify(Some(&state), &noisy), Ok(ChangeClassification::None));
    }

    #[test]
    fn test_classify_folder_time_change_is_not_a_change() {
        let folder = DriveItem::folder(DrivePath::new("/docs").unwrap(), at(10));
        let state = state_of(&folder);
        let touched = DriveItem::folder(DrivePath::new("/docs").unwrap(), at(99));
        assert_eq!(classify(Some(&state), &touched), Ok(ChangeClassification::None));
    }

    #[test]
    fn test_classify_deleted() {
        let item = file("/a.txt", 1, 10).with_id("ID1");
        let state = state_of(&item);
        let tombstone = item.clone().into_tombstone();
        assert_eq!(
            classify(Some(&state), &tombstone),
            Ok(ChangeClassification::Deleted)
        );
        assert_eq!(classify(None, &tombstone), Ok(ChangeClassification::None));
    }

    #[test]
    fn test_classify_renamed_same_id() {
        let item = file("/a.txt", 1, 10).with_id("ID1");
        let state = state_of(&item);
        let moved = item.relocated(DrivePath::new("/b/a.txt").unwrap());
        assert_eq!(classify(Some(&state), &moved), Ok(ChangeClassification::Renamed));
    }

    #[test]
    fn test_classify_identity_violation_on_id_mismatch() {
        let item = file("/a.txt", 1, 10).with_id("ID1");
        let mut state = state_of(&item);
        state.id = "ID2".to_string();
        let err = classify(Some(&state), &item).unwrap_err();
        assert!(matches!(err, DomainError::IdentityViolation { .. }));
    }

    #[test]
    fn test_classify_identity_violation_on_kind_mismatch() {
        let item = file("/a", 1, 10);
        let state = state_of(&item);
        let folder = DriveItem::folder(DrivePath::new("/a").unwrap(), at(10));
        assert!(matches!(
            classify(Some(&state), &folder),
            Err(DomainError::IdentityViolation { .. })
        ));
    }

    #[test]
    fn test_classify_unsupported_kind() {
        let item = DriveItem::new(
            DrivePath::new("/pipe").unwrap(),
            ItemKind::Unsupported,
            0,
            at(0),
        );
        assert_eq!(
            classify(None, &item),
            Err(DomainError::UnsupportedItemKind("/pipe".to_string()))
        );
    }

    #[test]
    fn test_state_round_trips_to_item() {
        let item = file("/x/y.bin", 42, 77).with_id("abc");
        let state = state_of(&item);
        assert_eq!(state.key, "abc");
        assert_eq!(state.to_item(), item);
    }
}
