//! Transient drive item descriptors and content handles
//!
//! A [`DriveItem`] is built for each entry of a delta page and discarded once
//! the pass has applied it. Content never lives in the item itself: the item
//! optionally carries a [`DownloadLocator`], and content is materialized as a
//! [`ContentStream`] only when a transfer needs it.

use std::fmt;
use std::io::Read;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::path::DrivePath;

/// Kind of entry reported by a drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Folder,
    /// Anything else (symlinks, devices, provider-specific packages)
    Unsupported,
}

impl ItemKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
            ItemKind::Unsupported => "unsupported",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(ItemKind::File),
            "folder" => Some(ItemKind::Folder),
            "unsupported" => Some(ItemKind::Unsupported),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drop sub-second precision; drives compare timestamps at second granularity
#[must_use]
pub fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    time.with_nanosecond(0).unwrap_or(time)
}

/// Opaque, possibly expiring handle for fetching an item's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLocator {
    pub url: String,
    /// `None` means the locator never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl DownloadLocator {
    #[must_use]
    pub fn new(url: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            url: url.into(),
            expires_at,
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// Readable item content, with its exact length when the producer knows it
pub struct ContentStream {
    reader: Box<dyn Read + Send>,
    length: Option<u64>,
}

impl ContentStream {
    pub fn new(reader: impl Read + Send + 'static, length: Option<u64>) -> Self {
        Self {
            reader: Box::new(reader),
            length,
        }
    }

    /// In-memory content of known length
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let length = bytes.len() as u64;
        Self::new(std::io::Cursor::new(bytes), Some(length))
    }

    #[must_use]
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    #[must_use]
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }

    /// Split into the boxed reader and declared length
    #[must_use]
    pub fn into_parts(self) -> (Box<dyn Read + Send>, Option<u64>) {
        (self.reader, self.length)
    }
}

impl Read for ContentStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStream")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// One entry of a drive listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveItem {
    /// Drive-assigned identifier; empty when the drive addresses items by path
    pub id: String,
    pub name: String,
    pub path: DrivePath,
    pub kind: ItemKind,
    pub size: u64,
    /// UTC, second precision
    pub last_modified: DateTime<Utc>,
    pub deleted: bool,
    pub locator: Option<DownloadLocator>,
}

impl DriveItem {
    /// Describe a live file
    #[must_use]
    pub fn file(path: DrivePath, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self::new(path, ItemKind::File, size, last_modified)
    }

    /// Describe a live folder
    #[must_use]
    pub fn folder(path: DrivePath, last_modified: DateTime<Utc>) -> Self {
        Self::new(path, ItemKind::Folder, 0, last_modified)
    }

    #[must_use]
    pub fn new(path: DrivePath, kind: ItemKind, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            name: path.file_name().unwrap_or_default().to_string(),
            path,
            kind,
            size,
            last_modified: truncate_to_seconds(last_modified),
            deleted: false,
            locator: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_locator(mut self, locator: DownloadLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Persisted-state key: the id when known, the path otherwise
    #[must_use]
    pub fn key(&self) -> String {
        if self.id.is_empty() {
            self.path.as_str().to_string()
        } else {
            self.id.clone()
        }
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }

    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Copy without drive-specific identity, so another drive resolves it by path
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            id: String::new(),
            locator: None,
            ..self.clone()
        }
    }

    /// Same item placed at another path
    #[must_use]
    pub fn relocated(&self, path: DrivePath) -> Self {
        Self {
            name: path.file_name().unwrap_or_default().to_string(),
            path,
            ..self.clone()
        }
    }

    /// Mark the item as removed from its drive
    #[must_use]
    pub fn into_tombstone(mut self) -> Self {
        self.deleted = true;
        self.locator = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64, nanos: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, nanos).single().unwrap()
    }

    #[test]
    fn test_new_item_truncates_time_and_derives_name() {
        let item = DriveItem::file(DrivePath::new("/docs/a.txt").unwrap(), 10, at(100, 999));
        assert_eq!(item.name, "a.txt");
        assert_eq!(item.last_modified, at(100, 0));
        assert!(item.is_file());
        assert!(!item.deleted);
    }

    #[test]
    fn test_key_prefers_id() {
        let path = DrivePath::new("/a.txt").unwrap();
        let item = DriveItem::file(path.clone(), 1, at(0, 0));
        assert_eq!(item.key(), "/a.txt");
        assert_eq!(item.with_id("X1").key(), "X1");
    }

    #[test]
    fn test_detached_clears_identity() {
        let item = DriveItem::file(DrivePath::new("/a.txt").unwrap(), 1, at(0, 0))
            .with_id("X1")
            .with_locator(DownloadLocator::new("mem://X1", None));
        let detached = item.detached();
        assert!(detached.id.is_empty());
        assert!(detached.locator.is_none());
        assert_eq!(detached.path, item.path);
    }

    #[test]
    fn test_relocated_updates_name() {
        let item = DriveItem::folder(DrivePath::new("/old").unwrap(), at(0, 0));
        let moved = item.relocated(DrivePath::new("/new/place").unwrap());
        assert_eq!(moved.name, "place");
        assert_eq!(moved.kind, ItemKind::Folder);
    }

    #[test]
    fn test_locator_expiry() {
        let never = DownloadLocator::new("file:///x", None);
        assert!(!never.is_expired_at(at(i64::from(u32::MAX), 0)));

        let soon = DownloadLocator::new("mem://x", Some(at(100, 0)));
        assert!(!soon.is_expired_at(at(99, 0)));
        assert!(soon.is_expired_at(at(100, 0)));
    }

    #[test]
    fn test_content_stream_from_bytes() {
        let mut stream = ContentStream::from_bytes(b"hello".to_vec());
        assert_eq!(stream.length(), Some(5));
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_item_kind_parse() {
        for kind in [ItemKind::File, ItemKind::Folder, ItemKind::Unsupported] {
            assert_eq!(ItemKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ItemKind::parse("symlink"), None);
    }
}
