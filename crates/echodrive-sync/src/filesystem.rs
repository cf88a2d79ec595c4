//! Local folder drive (secondary/driven adapter)
//!
//! Implements [`IDriveProxy`] over a directory on this machine.
//!
//! ## Design Decisions
//!
//! - **Snapshot listing**: a listing starts by walking the whole tree once;
//!   pages are slices of that snapshot. Cursors are `"<generation>:<offset>"`
//!   and die when a new listing starts.
//! - **Deterministic order**: entries are sorted by name and every folder is
//!   emitted before its children.
//! - **Access denied**: unreadable entries and subfolders are skipped with a
//!   warning and reported in [`DeltaPage::skipped`] on the first page; an
//!   unreadable root fails the listing.
//! - **Atomic writes**: content goes to `<name>.echodrive.tmp` in the target
//!   folder, gets the item's modification time, and is renamed into place.
//!   Temp files never appear in listings.
//! - **Path addressing**: items have no id; the path is the identity.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use base64::Engine;
use chrono::{DateTime, Utc};
use echodrive_core::config::{expand_tilde, DriveConfig};
use echodrive_core::domain::{ContentStream, DownloadLocator, DriveItem, DrivePath, ItemKind};
use echodrive_core::ports::{DeltaPage, DriveError, IDriveProxy};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use url::Url;

/// Suffix of in-flight writes
pub const TEMP_SUFFIX: &str = ".echodrive.tmp";

/// Default number of items per listing page
pub const DEFAULT_PAGE_SIZE: usize = 200;

#[derive(Default)]
struct Snapshot {
    generation: u64,
    items: Arc<Vec<DriveItem>>,
}

/// Result of walking the tree once
#[derive(Debug, Default)]
struct Walk {
    items: Vec<DriveItem>,
    skipped: Vec<DrivePath>,
}

/// Drive over a local directory
pub struct LocalDrive {
    name: String,
    root: PathBuf,
    page_size: usize,
    snapshot: Mutex<Snapshot>,
}

impl std::fmt::Debug for LocalDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDrive")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl LocalDrive {
    #[must_use]
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
            snapshot: Mutex::new(Snapshot::default()),
        }
    }

    /// Drive for a configured folder, with `~` expanded
    #[must_use]
    pub fn from_config(config: &DriveConfig, page_size: usize) -> Self {
        Self::new(config.name.clone(), expand_tilde(&config.root)).with_page_size(page_size)
    }

    /// Set the listing page size (at least 1)
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fs_path(&self, path: &DrivePath) -> PathBuf {
        path.to_fs_path(&self.root)
    }

    async fn stat(&self, path: &DrivePath) -> Result<Option<DriveItem>, DriveError> {
        match tokio::fs::symlink_metadata(self.fs_path(path)).await {
            Ok(meta) => Ok(Some(item_from_metadata(path.clone(), &meta))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DriveError::io(path.as_str(), e)),
        }
    }

    fn page_of(items: &[DriveItem], generation: u64, offset: usize, page_size: usize) -> DeltaPage {
        let end = (offset + page_size).min(items.len());
        let next_cursor = (end < items.len()).then(|| format!("{generation}:{end}"));
        DeltaPage {
            items: items[offset.min(end)..end].to_vec(),
            next_cursor,
            skipped: Vec::new(),
        }
    }
}

// ============================================================================
// Blocking helpers
// ============================================================================

fn to_utc(time: io::Result<SystemTime>) -> DateTime<Utc> {
    DateTime::<Utc>::from(time.unwrap_or(SystemTime::UNIX_EPOCH))
}

fn item_from_metadata(path: DrivePath, meta: &fs::Metadata) -> DriveItem {
    let kind = if meta.is_dir() {
        ItemKind::Folder
    } else if meta.is_file() {
        ItemKind::File
    } else {
        ItemKind::Unsupported
    };
    let size = if kind == ItemKind::File { meta.len() } else { 0 };
    DriveItem::new(path, kind, size, to_utc(meta.modified()))
}

fn is_temp_file(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX)
}

fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{name}{TEMP_SUFFIX}"))
}

/// Walk `root`, parents first, siblings sorted by name
fn walk(root: &Path) -> io::Result<Walk> {
    let mut out = Walk::default();
    let entries = fs::read_dir(root)?;
    walk_entries(root, entries, &mut out);
    Ok(out)
}

fn walk_entries(root: &Path, entries: fs::ReadDir, out: &mut Walk) {
    let mut children: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    children.sort();

    for child in children {
        let Some(name) = child.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %child.display(), "Skipping entry with non UTF-8 name");
            continue;
        };
        if is_temp_file(name) {
            continue;
        }

        let Some(path) = DrivePath::from_fs_path(root, &child) else {
            continue;
        };
        let meta = match fs::symlink_metadata(&child) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %child.display(), error = %e, "Cannot stat entry, skipping");
                out.skipped.push(path);
                continue;
            }
        };

        out.items.push(item_from_metadata(path.clone(), &meta));

        if meta.is_dir() {
            match fs::read_dir(&child) {
                Ok(entries) => walk_entries(root, entries, out),
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    warn!(path = %child.display(), "Access denied, skipping subtree");
                    out.skipped.push(path);
                }
                Err(e) => {
                    warn!(path = %child.display(), error = %e, "Cannot list folder, skipping subtree");
                    out.skipped.push(path);
                }
            }
        }
    }
}

fn write_atomic(target: &Path, mut content: ContentStream, modified: SystemTime) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(target);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        io::copy(&mut content, &mut file)?;
        file.set_modified(modified)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, target)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(hasher.finalize()))
}

fn join_error(e: tokio::task::JoinError) -> DriveError {
    DriveError::Other(anyhow::anyhow!("Blocking task failed: {e}"))
}

// ============================================================================
// IDriveProxy implementation
// ============================================================================

#[async_trait::async_trait]
impl IDriveProxy for LocalDrive {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_local(&self) -> bool {
        true
    }

    #[instrument(skip(self), fields(drive = %self.name))]
    async fn delta_page(&self, cursor: Option<&str>) -> Result<DeltaPage, DriveError> {
        let Some(cursor) = cursor else {
            let root = self.root.clone();
            let Walk { items, skipped } = tokio::task::spawn_blocking(move || walk(&root))
                .await
                .map_err(join_error)?
                .map_err(|e| DriveError::io(self.root.display().to_string(), e))?;

            let items = Arc::new(items);
            let generation = {
                let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
                snapshot.generation += 1;
                snapshot.items = Arc::clone(&items);
                snapshot.generation
            };
            debug!(
                generation,
                count = items.len(),
                skipped = skipped.len(),
                "Listing snapshot taken"
            );
            let mut first = Self::page_of(&items, generation, 0, self.page_size);
            first.skipped = skipped;
            return Ok(first);
        };

        let invalid = || DriveError::InvalidCursor(cursor.to_string());
        let (generation, offset) = cursor.split_once(':').ok_or_else(invalid)?;
        let generation: u64 = generation.parse().map_err(|_| invalid())?;
        let offset: usize = offset.parse().map_err(|_| invalid())?;

        let items = {
            let snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
            if snapshot.generation != generation || offset > snapshot.items.len() {
                return Err(invalid());
            }
            Arc::clone(&snapshot.items)
        };
        Ok(Self::page_of(&items, generation, offset, self.page_size))
    }

    #[instrument(skip(self, content), fields(drive = %self.name, path = %item.path))]
    async fn create_or_update(
        &self,
        item: &DriveItem,
        content: Option<ContentStream>,
    ) -> Result<DriveItem, DriveError> {
        let target = self.fs_path(&item.path);

        match item.kind {
            ItemKind::Folder => {
                tokio::fs::create_dir_all(&target)
                    .await
                    .map_err(|e| DriveError::io(item.path.as_str(), e))?;
            }
            ItemKind::File => {
                let content = content.ok_or_else(|| {
                    DriveError::Other(anyhow::anyhow!("No content given for file {}", item.path))
                })?;
                let modified = SystemTime::from(item.last_modified);
                tokio::task::spawn_blocking(move || write_atomic(&target, content, modified))
                    .await
                    .map_err(join_error)?
                    .map_err(|e| DriveError::io(item.path.as_str(), e))?;
            }
            ItemKind::Unsupported => {
                return Err(DriveError::UnsupportedItemKind(item.path.to_string()));
            }
        }

        debug!("Item written");
        self.stat(&item.path)
            .await?
            .ok_or_else(|| DriveError::NotFound(item.path.to_string()))
    }

    #[instrument(skip(self), fields(drive = %self.name, from = %old.path, to = %new.path))]
    async fn move_item(&self, old: &DriveItem, new: &DriveItem) -> Result<DriveItem, DriveError> {
        let from = self.fs_path(&old.path);
        let to = self.fs_path(&new.path);

        if tokio::fs::try_exists(&to)
            .await
            .map_err(|e| DriveError::io(new.path.as_str(), e))?
        {
            return Err(DriveError::MoveDestinationExists(new.path.to_string()));
        }
        if self.stat(&old.path).await?.is_none() {
            return Err(DriveError::NotFound(old.path.to_string()));
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DriveError::io(new.path.as_str(), e))?;
        }
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| DriveError::io(old.path.as_str(), e))?;

        self.stat(&new.path)
            .await?
            .ok_or_else(|| DriveError::NotFound(new.path.to_string()))
    }

    #[instrument(skip(self), fields(drive = %self.name, path = %item.path))]
    async fn delete(&self, item: &DriveItem) -> Result<(), DriveError> {
        let target = self.fs_path(&item.path);
        let meta = tokio::fs::symlink_metadata(&target)
            .await
            .map_err(|e| DriveError::io(item.path.as_str(), e))?;

        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        result.map_err(|e| DriveError::io(item.path.as_str(), e))
    }

    async fn exists(&self, item: &DriveItem) -> Result<bool, DriveError> {
        Ok(self.stat(&item.path).await?.is_some())
    }

    async fn get_item(&self, item: &DriveItem) -> Result<Option<DriveItem>, DriveError> {
        self.stat(&item.path).await
    }

    async fn get_last_write_time_utc(&self, item: &DriveItem) -> Result<DateTime<Utc>, DriveError> {
        self.stat(&item.path)
            .await?
            .map(|i| i.last_modified)
            .ok_or_else(|| DriveError::NotFound(item.path.to_string()))
    }

    #[instrument(skip(self), fields(drive = %self.name, path = %item.path))]
    async fn get_content_hash(&self, item: &DriveItem) -> Result<String, DriveError> {
        if item.is_folder() {
            return Ok(String::new());
        }
        let target = self.fs_path(&item.path);
        tokio::task::spawn_blocking(move || hash_file(&target))
            .await
            .map_err(join_error)?
            .map_err(|e| DriveError::io(item.path.as_str(), e))
    }

    async fn get_download_locator(&self, item: &DriveItem) -> Result<DownloadLocator, DriveError> {
        let url = Url::from_file_path(self.fs_path(&item.path)).map_err(|()| {
            DriveError::Other(anyhow::anyhow!("Cannot build file URL for {}", item.path))
        })?;
        Ok(DownloadLocator::new(url.to_string(), None))
    }

    async fn open_content(&self, locator: &DownloadLocator) -> Result<ContentStream, DriveError> {
        let path = Url::parse(&locator.url)
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| {
                DriveError::Other(anyhow::anyhow!("Not a file locator: {}", locator.url))
            })?;

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| DriveError::io(path.display().to_string(), e))?;
        let length = file
            .metadata()
            .await
            .map_err(|e| DriveError::io(path.display().to_string(), e))?
            .len();
        Ok(ContentStream::new(file.into_std().await, Some(length)))
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    fn path(s: &str) -> DrivePath {
        DrivePath::new(s).unwrap()
    }

    fn seed(dir: &TempDir) {
        fs::create_dir_all(dir.path().join("b/inner")).unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/one.txt"), b"1").unwrap();
        fs::write(dir.path().join("b/inner/two.txt"), b"22").unwrap();
        fs::write(dir.path().join("root.txt"), b"333").unwrap();
        fs::write(dir.path().join(format!("partial{TEMP_SUFFIX}")), b"x").unwrap();
    }

    async fn read_all(drive: &LocalDrive, item: &DriveItem) -> Vec<u8> {
        let locator = drive.get_download_locator(item).await.unwrap();
        let mut content = drive.open_content(&locator).await.unwrap();
        let mut out = Vec::new();
        content.read_to_end(&mut out).unwrap();
        out
    }

    // ------------------------------------------------------------------
    // listing
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_listing_is_sorted_parents_first() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let drive = LocalDrive::new("local", dir.path());

        let paths: Vec<String> = drive
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.path.to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "/a",
                "/a/one.txt",
                "/b",
                "/b/inner",
                "/b/inner/two.txt",
                "/root.txt"
            ]
        );
    }

    #[tokio::test]
    async fn test_listing_pages_follow_cursor() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let drive = LocalDrive::new("local", dir.path()).with_page_size(4);

        let first = drive.delta_page(None).await.unwrap();
        assert_eq!(first.items.len(), 4);
        let cursor = first.next_cursor.unwrap();

        let second = drive.delta_page(Some(&cursor)).await.unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_stale_cursor_is_rejected() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let drive = LocalDrive::new("local", dir.path()).with_page_size(2);

        let cursor = drive.delta_page(None).await.unwrap().next_cursor.unwrap();
        drive.delta_page(None).await.unwrap();

        assert!(matches!(
            drive.delta_page(Some(&cursor)).await,
            Err(DriveError::InvalidCursor(_))
        ));
        assert!(matches!(
            drive.delta_page(Some("garbage")).await,
            Err(DriveError::InvalidCursor(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_folder_is_reported_as_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        seed(&dir);
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("secret.txt"), b"s").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users read through the mode bits
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let drive = LocalDrive::new("local", dir.path()).with_page_size(2);
        let first = drive.delta_page(None).await;
        let all = drive.list_all().await;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(first.unwrap().skipped, vec![path("/locked")]);
        let paths: Vec<String> = all
            .unwrap()
            .into_iter()
            .map(|i| i.path.to_string())
            .collect();
        assert!(paths.contains(&"/locked".to_string()));
        assert!(!paths.contains(&"/locked/secret.txt".to_string()));
    }

    #[tokio::test]
    async fn test_readable_tree_skips_nothing() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let drive = LocalDrive::new("local", dir.path()).with_page_size(2);

        let first = drive.delta_page(None).await.unwrap();
        assert!(first.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_fails_listing() {
        let dir = TempDir::new().unwrap();
        let drive = LocalDrive::new("local", dir.path().join("absent"));
        assert!(drive.delta_page(None).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_is_unsupported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link")).unwrap();
        let drive = LocalDrive::new("local", dir.path());

        let items = drive.list_all().await.unwrap();
        let link = items.iter().find(|i| i.path == path("/link")).unwrap();
        assert_eq!(link.kind, ItemKind::Unsupported);
    }

    // ------------------------------------------------------------------
    // writes
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_write_creates_parents_and_sets_mtime() {
        let dir = TempDir::new().unwrap();
        let drive = LocalDrive::new("local", dir.path());
        let modified = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).single().unwrap();
        let item = DriveItem::file(path("/x/y/z.txt"), 5, modified);

        let written = drive
            .create_or_update(&item, Some(ContentStream::from_bytes(b"hello".to_vec())))
            .await
            .unwrap();

        assert_eq!(written.last_modified, modified);
        assert_eq!(written.size, 5);
        assert_eq!(read_all(&drive, &written).await, b"hello");
        assert!(!dir.path().join(format!("x/y/z.txt{TEMP_SUFFIX}")).exists());
    }

    #[tokio::test]
    async fn test_write_file_without_content_fails() {
        let dir = TempDir::new().unwrap();
        let drive = LocalDrive::new("local", dir.path());
        let item = DriveItem::file(path("/a.txt"), 0, Utc::now());
        assert!(drive.create_or_update(&item, None).await.is_err());
        assert!(!drive.exists(&item).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_folder() {
        let dir = TempDir::new().unwrap();
        let drive = LocalDrive::new("local", dir.path());
        let folder = DriveItem::folder(path("/photos/2024"), Utc::now());
        let created = drive.create_or_update(&folder, None).await.unwrap();
        assert!(created.is_folder());
        assert!(dir.path().join("photos/2024").is_dir());
    }

    // ------------------------------------------------------------------
    // move / delete
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_move_refuses_occupied_destination() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("src.txt"), b"source").unwrap();
        fs::write(dir.path().join("dst.txt"), b"other").unwrap();
        let drive = LocalDrive::new("local", dir.path());

        let src = drive.get_item(&DriveItem::file(path("/src.txt"), 0, Utc::now())).await.unwrap().unwrap();
        let dst = src.relocated(path("/dst.txt"));

        assert!(matches!(
            drive.move_item(&src, &dst).await,
            Err(DriveError::MoveDestinationExists(_))
        ));
        assert_eq!(fs::read(dir.path().join("src.txt")).unwrap(), b"source");
        assert_eq!(fs::read(dir.path().join("dst.txt")).unwrap(), b"other");
    }

    #[tokio::test]
    async fn test_move_into_new_folder() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("src.txt"), b"source").unwrap();
        let drive = LocalDrive::new("local", dir.path());
        let src = DriveItem::file(path("/src.txt"), 6, Utc::now());

        let moved = drive
            .move_item(&src, &src.relocated(path("/archive/src.txt")))
            .await
            .unwrap();
        assert_eq!(moved.path, path("/archive/src.txt"));
        assert!(!drive.exists(&src).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_folder_is_recursive() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let drive = LocalDrive::new("local", dir.path());

        drive
            .delete(&DriveItem::folder(path("/b"), Utc::now()))
            .await
            .unwrap();
        assert!(!dir.path().join("b").exists());

        assert!(matches!(
            drive.delete(&DriveItem::folder(path("/b"), Utc::now())).await,
            Err(DriveError::NotFound(_))
        ));
    }

    // ------------------------------------------------------------------
    // hashes and locators
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_content_hash_is_base64_sha256() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("abc.txt"), b"abc").unwrap();
        let drive = LocalDrive::new("local", dir.path());

        let hash = drive
            .get_content_hash(&DriveItem::file(path("/abc.txt"), 3, Utc::now()))
            .await
            .unwrap();
        assert_eq!(hash, "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=");
    }

    #[tokio::test]
    async fn test_locator_is_file_url_without_expiry() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a b.txt"), b"spaced").unwrap();
        let drive = LocalDrive::new("local", dir.path());
        let item = DriveItem::file(path("/a b.txt"), 6, Utc::now());

        let locator = drive.get_download_locator(&item).await.unwrap();
        assert!(locator.url.starts_with("file://"));
        assert!(locator.expires_at.is_none());
        assert_eq!(read_all(&drive, &item).await, b"spaced");
    }
}
