//! Shared helpers for engine integration tests
//!
//! [`MemoryDrive`] is an id-addressed drive kept entirely in memory, with a
//! configurable page size, locators that can be made to expire, and folders
//! whose contents can be made unreadable.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use echodrive_cache::{DatabasePool, SqliteStateRepository};
use echodrive_core::domain::{ContentStream, DownloadLocator, DriveItem, DrivePath, ItemKind};
use echodrive_core::ports::{DeltaPage, DriveError, IDriveProxy};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub fn path(s: &str) -> DrivePath {
    DrivePath::new(s).unwrap()
}

/// Fixed point in time, `secs` seconds after 2026-01-01
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap() + Duration::seconds(secs)
}

pub async fn state_store() -> Arc<SqliteStateRepository> {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    Arc::new(SqliteStateRepository::new(pool.pool().clone()))
}

#[derive(Clone)]
struct Entry {
    item: DriveItem,
    content: Vec<u8>,
}

/// In-memory drive with drive-assigned ids
pub struct MemoryDrive {
    name: String,
    page_size: usize,
    entries: Mutex<BTreeMap<String, Entry>>,
    snapshot: Mutex<Vec<DriveItem>>,
    unreadable: Mutex<Vec<DrivePath>>,
    expired_locators: AtomicUsize,
    opens: AtomicUsize,
    listings: AtomicUsize,
}

impl MemoryDrive {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            page_size: 2,
            entries: Mutex::new(BTreeMap::new()),
            snapshot: Mutex::new(Vec::new()),
            unreadable: Mutex::new(Vec::new()),
            expired_locators: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            listings: AtomicUsize::new(0),
        }
    }

    /// Leave everything below `p` out of listings, as an access-denied folder
    pub fn deny(&self, p: &str) {
        self.unreadable.lock().unwrap().push(path(p));
    }

    pub fn allow_all(&self) {
        self.unreadable.lock().unwrap().clear();
    }

    /// Number of listings started so far
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    /// Hand out the next `count` locators already expired
    pub fn expire_next_locators(&self, count: usize) {
        self.expired_locators.store(count, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn put_file(&self, p: &str, content: &[u8], secs: i64) -> DriveItem {
        let item = DriveItem::file(path(p), content.len() as u64, at(secs));
        self.store(&item, content.to_vec())
    }

    pub fn put_folder(&self, p: &str) -> DriveItem {
        self.store(&DriveItem::folder(path(p), at(0)), Vec::new())
    }

    pub fn read(&self, p: &str) -> Option<Vec<u8>> {
        let target = path(p);
        self.entries
            .lock()
            .unwrap()
            .values()
            .find(|e| e.item.path == target)
            .map(|e| e.content.clone())
    }

    pub fn contains(&self, p: &str) -> bool {
        let target = path(p);
        self.entries
            .lock()
            .unwrap()
            .values()
            .any(|e| e.item.path == target)
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .lock()
            .unwrap()
            .values()
            .map(|e| e.item.path.to_string())
            .collect();
        paths.sort();
        paths
    }

    pub fn id_of(&self, p: &str) -> Option<String> {
        let target = path(p);
        self.entries
            .lock()
            .unwrap()
            .values()
            .find(|e| e.item.path == target)
            .map(|e| e.item.id.clone())
    }

    /// Remove `p` and everything below it, as a user would
    pub fn remove(&self, p: &str) {
        let target = path(p);
        self.entries
            .lock()
            .unwrap()
            .retain(|_, e| e.item.path != target && !target.is_ancestor_of(&e.item.path));
    }

    /// Rename `from` to `to` keeping ids, as a user would
    pub fn rename(&self, from: &str, to: &str) {
        let (from, to) = (path(from), path(to));
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.values_mut() {
            if entry.item.path == from {
                entry.item = entry.item.relocated(to.clone());
            } else if from.is_ancestor_of(&entry.item.path) {
                let rest = &entry.item.path.as_str()[from.as_str().len()..];
                entry.item = entry
                    .item
                    .relocated(DrivePath::new(format!("{}{}", to.as_str(), rest)).unwrap());
            }
        }
    }

    fn store(&self, item: &DriveItem, content: Vec<u8>) -> DriveItem {
        let mut entries = self.entries.lock().unwrap();

        let mut parent = item.path.parent();
        while let Some(folder) = parent {
            if folder.is_root() {
                break;
            }
            if !entries.values().any(|e| e.item.path == folder) {
                let id = Uuid::new_v4().to_string();
                let created = DriveItem::folder(folder.clone(), item.last_modified).with_id(&id);
                entries.insert(id, Entry { item: created, content: Vec::new() });
            }
            parent = folder.parent();
        }

        let existing = entries
            .iter()
            .find(|(_, e)| e.item.path == item.path)
            .map(|(id, _)| id.clone());
        let id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
        let stored = DriveItem::new(
            item.path.clone(),
            item.kind,
            content.len() as u64,
            item.last_modified,
        )
        .with_id(&id);
        entries.insert(id, Entry { item: stored.clone(), content });
        stored
    }

    fn find(&self, item: &DriveItem) -> Option<Entry> {
        let entries = self.entries.lock().unwrap();
        if item.id.is_empty() {
            entries.values().find(|e| e.item.path == item.path).cloned()
        } else {
            entries.get(&item.id).cloned()
        }
    }

    fn hash(content: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(Sha256::digest(content))
    }
}

#[async_trait::async_trait]
impl IDriveProxy for MemoryDrive {
    fn name(&self) -> &str {
        &self.name
    }

    async fn delta_page(&self, cursor: Option<&str>) -> Result<DeltaPage, DriveError> {
        let mut snapshot = self.snapshot.lock().unwrap();
        let unreadable = self.unreadable.lock().unwrap().clone();
        let offset = match cursor {
            None => {
                self.listings.fetch_add(1, Ordering::SeqCst);
                let mut items: Vec<DriveItem> = self
                    .entries
                    .lock()
                    .unwrap()
                    .values()
                    .filter(|e| !unreadable.iter().any(|u| u.is_ancestor_of(&e.item.path)))
                    .map(|e| e.item.clone())
                    .collect();
                items.sort_by(|a, b| a.path.as_str().cmp(b.path.as_str()));
                *snapshot = items;
                0
            }
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| DriveError::InvalidCursor(cursor.to_string()))?,
        };

        let end = (offset + self.page_size).min(snapshot.len());
        Ok(DeltaPage {
            items: snapshot[offset.min(end)..end].to_vec(),
            next_cursor: (end < snapshot.len()).then(|| end.to_string()),
            skipped: if offset == 0 { unreadable } else { Vec::new() },
        })
    }

    async fn create_or_update(
        &self,
        item: &DriveItem,
        content: Option<ContentStream>,
    ) -> Result<DriveItem, DriveError> {
        let bytes = match (item.kind, content) {
            (ItemKind::Folder, _) => Vec::new(),
            (_, Some(content)) => {
                let mut bytes = Vec::new();
                std::io::Read::read_to_end(&mut content.into_reader(), &mut bytes)
                    .map_err(|e| DriveError::io(item.path.as_str(), e))?;
                bytes
            }
            (_, None) => {
                return Err(DriveError::Other(anyhow::anyhow!(
                    "file without content: {}",
                    item.path
                )))
            }
        };
        Ok(self.store(item, bytes))
    }

    async fn move_item(&self, old: &DriveItem, new: &DriveItem) -> Result<DriveItem, DriveError> {
        let entry = self
            .find(old)
            .ok_or_else(|| DriveError::NotFound(old.path.to_string()))?;
        if self.contains(new.path.as_str()) {
            return Err(DriveError::MoveDestinationExists(new.path.to_string()));
        }
        self.rename(entry.item.path.as_str(), new.path.as_str());
        self.find(&entry.item)
            .map(|e| e.item)
            .ok_or_else(|| DriveError::NotFound(new.path.to_string()))
    }

    async fn delete(&self, item: &DriveItem) -> Result<(), DriveError> {
        let entry = self
            .find(item)
            .ok_or_else(|| DriveError::NotFound(item.path.to_string()))?;
        self.remove(entry.item.path.as_str());
        Ok(())
    }

    async fn exists(&self, item: &DriveItem) -> Result<bool, DriveError> {
        Ok(self.find(item).is_some())
    }

    async fn get_item(&self, item: &DriveItem) -> Result<Option<DriveItem>, DriveError> {
        Ok(self.find(item).map(|e| e.item))
    }

    async fn get_last_write_time_utc(&self, item: &DriveItem) -> Result<DateTime<Utc>, DriveError> {
        self.find(item)
            .map(|e| e.item.last_modified)
            .ok_or_else(|| DriveError::NotFound(item.path.to_string()))
    }

    async fn get_content_hash(&self, item: &DriveItem) -> Result<String, DriveError> {
        let entry = self
            .find(item)
            .ok_or_else(|| DriveError::NotFound(item.path.to_string()))?;
        Ok(if entry.item.is_file() {
            Self::hash(&entry.content)
        } else {
            String::new()
        })
    }

    async fn get_download_locator(&self, item: &DriveItem) -> Result<DownloadLocator, DriveError> {
        let entry = self
            .find(item)
            .ok_or_else(|| DriveError::NotFound(item.path.to_string()))?;
        let expired = self
            .expired_locators
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let expires_at = if expired {
            Utc::now() - Duration::minutes(5)
        } else {
            Utc::now() + Duration::hours(1)
        };
        Ok(DownloadLocator::new(
            format!("mem://{}/{}", self.name, entry.item.id),
            Some(expires_at),
        ))
    }

    async fn open_content(&self, locator: &DownloadLocator) -> Result<ContentStream, DriveError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if locator.is_expired_at(Utc::now()) {
            return Err(DriveError::LocatorExpired(locator.url.clone()));
        }
        let id = locator
            .url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let entry = self
            .entries
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| DriveError::NotFound(locator.url.clone()))?;
        Ok(ContentStream::from_bytes(entry.content))
    }
}
