//! Conflict-copy naming
//!
//! Conflict copies follow the pattern
//! `<basename> (Conflicted Copy yyyy-MM-dd HHmmss)<.ext>`, stamped with the
//! last-modified time of the preserved version. The pattern is parsed back by
//! [`ConflictNamer::original_name`], so it must not change.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use echodrive_core::domain::{DomainError, DrivePath};
use regex::Regex;

/// chrono format of the timestamp inside a conflict name
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H%M%S";

/// Highest numbered suffix tried before giving up
pub const MAX_SUFFIX: u32 = 99;

fn conflict_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<stem>.*) \(Conflicted Copy \d{4}-\d{2}-\d{2} \d{6}\)(?: \d+)?(?P<ext>\.[^.]*)?$",
        )
        .expect("Invalid conflict-copy regex")
    })
}

/// Split `name` into stem and extension (including the dot).
///
/// A leading dot does not start an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

/// Generates and parses conflict-copy names
pub struct ConflictNamer;

impl ConflictNamer {
    /// Conflict-copy file name for `name`
    ///
    /// Given `report.docx` modified at 2024-03-05 14:07:09 UTC, produces
    /// `report (Conflicted Copy 2024-03-05 140709).docx`.
    pub fn conflict_name(name: &str, modified: DateTime<Utc>) -> String {
        let (stem, ext) = split_extension(name);
        format!(
            "{stem} (Conflicted Copy {}){ext}",
            modified.format(TIMESTAMP_FORMAT)
        )
    }

    /// Conflict-copy name with a numeric suffix; suffix 1 is the plain name
    pub fn numbered_name(name: &str, modified: DateTime<Utc>, suffix: u32) -> String {
        let base = Self::conflict_name(name, modified);
        if suffix <= 1 {
            return base;
        }
        let (stem, ext) = split_extension(name);
        format!(
            "{stem} (Conflicted Copy {}) {suffix}{ext}",
            modified.format(TIMESTAMP_FORMAT)
        )
    }

    /// Conflict-copy path in the same folder as `path`
    ///
    /// # Errors
    /// Returns an error for the root path.
    pub fn conflict_path(
        path: &DrivePath,
        modified: DateTime<Utc>,
        suffix: u32,
    ) -> Result<DrivePath, DomainError> {
        let name = path
            .file_name()
            .ok_or_else(|| DomainError::InvalidPath("root has no conflict copy".to_string()))?;
        path.with_file_name(&Self::numbered_name(name, modified, suffix))
    }

    /// Recover the original file name from a conflict-copy name
    pub fn original_name(conflict_name: &str) -> Option<String> {
        let captures = conflict_regex().captures(conflict_name)?;
        let stem = captures.name("stem")?.as_str();
        let ext = captures.name("ext").map_or("", |m| m.as_str());
        Some(format!("{stem}{ext}"))
    }

    /// Recover the original path from a conflict-copy path
    pub fn original_path(conflict_path: &DrivePath) -> Option<DrivePath> {
        let name = Self::original_name(conflict_path.file_name()?)?;
        conflict_path.with_file_name(&name).ok()
    }

    pub fn is_conflict_copy(path: &DrivePath) -> bool {
        path.file_name()
            .is_some_and(|name| conflict_regex().is_match(name))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).single().unwrap()
    }

    #[test]
    fn test_conflict_name_with_extension() {
        assert_eq!(
            ConflictNamer::conflict_name("report.docx", stamp()),
            "report (Conflicted Copy 2024-03-05 140709).docx"
        );
    }

    #[test]
    fn test_conflict_name_without_extension() {
        assert_eq!(
            ConflictNamer::conflict_name("Makefile", stamp()),
            "Makefile (Conflicted Copy 2024-03-05 140709)"
        );
    }

    #[test]
    fn test_conflict_name_with_multiple_dots() {
        assert_eq!(
            ConflictNamer::conflict_name("archive.tar.gz", stamp()),
            "archive.tar (Conflicted Copy 2024-03-05 140709).gz"
        );
    }

    #[test]
    fn test_conflict_name_hidden_file() {
        assert_eq!(
            ConflictNamer::conflict_name(".bashrc", stamp()),
            ".bashrc (Conflicted Copy 2024-03-05 140709)"
        );
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(
            ConflictNamer::numbered_name("a.txt", stamp(), 1),
            "a (Conflicted Copy 2024-03-05 140709).txt"
        );
        assert_eq!(
            ConflictNamer::numbered_name("a.txt", stamp(), 3),
            "a (Conflicted Copy 2024-03-05 140709) 3.txt"
        );
    }

    #[test]
    fn test_conflict_path_keeps_folder() {
        let path = DrivePath::new("/docs/q1/plan.md").unwrap();
        let conflict = ConflictNamer::conflict_path(&path, stamp(), 1).unwrap();
        assert_eq!(
            conflict.as_str(),
            "/docs/q1/plan (Conflicted Copy 2024-03-05 140709).md"
        );
        assert!(ConflictNamer::conflict_path(&DrivePath::root(), stamp(), 1).is_err());
    }

    #[test]
    fn test_original_name_reverses_every_shape() {
        for name in ["report.docx", "Makefile", "archive.tar.gz", ".bashrc", "a b (1).txt"] {
            for suffix in [1, 2, 17] {
                let conflict = ConflictNamer::numbered_name(name, stamp(), suffix);
                assert_eq!(
                    ConflictNamer::original_name(&conflict).as_deref(),
                    Some(name),
                    "{conflict}"
                );
            }
        }
    }

    #[test]
    fn test_original_name_rejects_lookalikes() {
        assert_eq!(ConflictNamer::original_name("report.docx"), None);
        assert_eq!(
            ConflictNamer::original_name("a (conflicted copy 2024-03-05 140709).txt"),
            None
        );
        assert_eq!(
            ConflictNamer::original_name("a (Conflicted Copy 2024-03-05 14:07:09).txt"),
            None
        );
    }

    #[test]
    fn test_original_path_and_detection() {
        let conflict = DrivePath::new("/x/y (Conflicted Copy 2024-03-05 140709).txt").unwrap();
        assert!(ConflictNamer::is_conflict_copy(&conflict));
        assert_eq!(
            ConflictNamer::original_path(&conflict),
            Some(DrivePath::new("/x/y.txt").unwrap())
        );
        assert!(!ConflictNamer::is_conflict_copy(&DrivePath::new("/x/y.txt").unwrap()));
    }
}
