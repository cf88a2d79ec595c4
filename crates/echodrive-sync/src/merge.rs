//! Notification accumulation and merging
//!
//! Raw watcher events are folded into a [`NotificationAccumulator`] as they
//! arrive. When the quiet interval elapses the accumulated entries are drained
//! and reduced by [`merge_notifications`] to the smallest list that still
//! covers every change.
//!
//! ## Rules
//!
//! Accumulation:
//! - `Descendants` at a path drops every accumulated entry nested under it,
//!   then sets the entry at the path to `Descendants`.
//! - `SelfOnly` at a path is only recorded when the path has no entry yet.
//!
//! Merge, in insertion order:
//! - a `Descendants` entry first removes every already-emitted entry nested
//!   under it;
//! - any entry covered by an emitted `Descendants` ancestor (or an equal
//!   emitted entry) is skipped.

use echodrive_core::domain::{ChangeScope, DriveChangedNotification, DrivePath};

/// Insertion-ordered map of pending notifications
#[derive(Debug, Default)]
pub struct NotificationAccumulator {
    entries: Vec<DriveChangedNotification>,
}

impl NotificationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn add(&mut self, notification: DriveChangedNotification) {
        let DriveChangedNotification { folder_path, scope } = notification;
        match scope {
            ChangeScope::Descendants => {
                self.entries
                    .retain(|e| !folder_path.is_ancestor_of(&e.folder_path));
                match self.position(&folder_path) {
                    Some(index) => self.entries[index].scope = ChangeScope::Descendants,
                    None => self
                        .entries
                        .push(DriveChangedNotification::descendants(folder_path)),
                }
            }
            ChangeScope::SelfOnly => {
                if self.position(&folder_path).is_none() {
                    self.entries
                        .push(DriveChangedNotification::self_only(folder_path));
                }
            }
        }
    }

    /// Take every entry in insertion order, leaving the accumulator empty
    pub fn drain(&mut self) -> Vec<DriveChangedNotification> {
        std::mem::take(&mut self.entries)
    }

    fn position(&self, path: &DrivePath) -> Option<usize> {
        self.entries.iter().position(|e| &e.folder_path == path)
    }
}

/// Reduce `notifications` to a minimal covering list.
///
/// Pure and idempotent: merging an already-merged list returns it unchanged.
pub fn merge_notifications(
    notifications: Vec<DriveChangedNotification>,
) -> Vec<DriveChangedNotification> {
    let mut emitted: Vec<DriveChangedNotification> = Vec::with_capacity(notifications.len());

    for notification in notifications {
        if notification.scope == ChangeScope::Descendants {
            emitted.retain(|e| !notification.folder_path.is_ancestor_of(&e.folder_path));
        }

        let covered = emitted.iter().any(|e| {
            (e.scope == ChangeScope::Descendants && e.folder_path.is_ancestor_of(&notification.folder_path))
                || (e.folder_path == notification.folder_path
                    && (e.scope == ChangeScope::Descendants || notification.scope == ChangeScope::SelfOnly))
        });
        if covered {
            continue;
        }

        // A Descendants entry replaces a SelfOnly one at the same path
        emitted.retain(|e| e.folder_path != notification.folder_path);
        emitted.push(notification);
    }

    emitted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> DrivePath {
        DrivePath::new(s).unwrap()
    }

    fn this(s: &str) -> DriveChangedNotification {
        DriveChangedNotification::self_only(path(s))
    }

    fn all(s: &str) -> DriveChangedNotification {
        DriveChangedNotification::descendants(path(s))
    }

    #[test]
    fn test_merge_example() {
        let input = vec![this("/a/b/c"), all("/a/b"), this("/a"), this("/a/b/c/d")];
        assert_eq!(merge_notifications(input), vec![all("/a/b"), this("/a")]);
    }

    #[test]
    fn test_merge_is_idempotent_on_example() {
        let once = merge_notifications(vec![
            this("/x"),
            all("/x/y"),
            this("/x/y/z"),
            all("/"),
            this("/q"),
        ]);
        assert_eq!(once, vec![all("/")]);
        assert_eq!(merge_notifications(once.clone()), once);
    }

    #[test]
    fn test_merge_keeps_lookalike_siblings() {
        let input = vec![all("/documents"), this("/documents - Copy")];
        assert_eq!(merge_notifications(input.clone()), input);
    }

    #[test]
    fn test_merge_deduplicates_same_path() {
        let input = vec![this("/a"), this("/a"), all("/a"), this("/a")];
        assert_eq!(merge_notifications(input), vec![all("/a")]);
    }

    #[test]
    fn test_self_does_not_cover_children() {
        let input = vec![this("/a"), this("/a/b")];
        assert_eq!(merge_notifications(input.clone()), input);
    }

    #[test]
    fn test_accumulator_descendants_subsumes_nested() {
        let mut acc = NotificationAccumulator::new();
        acc.add(this("/a/b/c"));
        acc.add(all("/a/b/c/d"));
        acc.add(this("/a"));
        acc.add(all("/a/b"));
        assert_eq!(acc.drain(), vec![this("/a"), all("/a/b")]);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_accumulator_self_does_not_downgrade() {
        let mut acc = NotificationAccumulator::new();
        acc.add(all("/a"));
        acc.add(this("/a"));
        acc.add(this("/b"));
        acc.add(this("/b"));
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.drain(), vec![all("/a"), this("/b")]);
    }

    #[test]
    fn test_accumulator_upgrades_in_place() {
        let mut acc = NotificationAccumulator::new();
        acc.add(this("/a"));
        acc.add(this("/b"));
        acc.add(all("/a"));
        assert_eq!(acc.drain(), vec![all("/a"), this("/b")]);
    }

    #[test]
    fn test_accumulated_self_under_descendants_is_merged_away() {
        let mut acc = NotificationAccumulator::new();
        acc.add(all("/a"));
        acc.add(this("/a/b"));
        assert_eq!(merge_notifications(acc.drain()), vec![all("/a")]);
    }
}
