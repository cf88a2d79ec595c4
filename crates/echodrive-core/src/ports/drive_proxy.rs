//! Drive proxy port (driven/secondary port)
//!
//! A drive proxy gives the sync engine one uniform view over a storage
//! endpoint: a local folder, a remote drive, or a decorator such as an
//! encrypting wrapper around either.
//!
//! ## Design Notes
//!
//! - Items are resolved by id when the id is non-empty, otherwise by path.
//!   Callers hand a drive the *detached* form of another drive's item
//!   ([`DriveItem::detached`]) so that foreign ids never leak across drives.
//! - Listing is pull-based ([`IDriveProxy::delta_page`]) with one active
//!   cursor per instance; [`IDriveProxy::process_delta`] drives the pages
//!   strictly in order and hands each one to an [`IDeltaPageHandler`].
//! - Errors are typed ([`DriveError`]) because the engine treats expired
//!   locators, occupied move destinations and unsupported kinds differently.

use chrono::{DateTime, Utc};

use crate::domain::{ContentStream, DownloadLocator, DriveItem, DrivePath};

// ============================================================================
// Errors
// ============================================================================

/// Failures reported by drive implementations
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    /// No item at the given path or id
    #[error("Item not found: {0}")]
    NotFound(String),

    /// A download locator could no longer be used; refresh it and retry once
    #[error("Download locator expired: {0}")]
    LocatorExpired(String),

    /// The destination of a move is already occupied
    #[error("Move destination already exists: {0}")]
    MoveDestinationExists(String),

    /// The drive refused access to the item
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The item is neither a file nor a folder
    #[error("Unsupported item kind: {0}")]
    UnsupportedItemKind(String),

    /// A listing cursor does not belong to the active listing
    #[error("Invalid listing cursor: {0}")]
    InvalidCursor(String),

    /// Underlying I/O failure
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Any other adapter-specific failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DriveError {
    /// Wrap an I/O error with the path it happened at
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => DriveError::NotFound(path.into()),
            std::io::ErrorKind::PermissionDenied => DriveError::AccessDenied(path.into()),
            _ => DriveError::Io {
                path: path.into(),
                source,
            },
        }
    }

    /// Only expired locators may be retried, and only once
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, DriveError::LocatorExpired(_))
    }
}

// ============================================================================
// Delta listing
// ============================================================================

/// One page of a complete listing
#[derive(Debug, Clone, Default)]
pub struct DeltaPage {
    /// Items in listing order; parents precede their children
    pub items: Vec<DriveItem>,
    /// Cursor of the next page, `None` on the last page
    pub next_cursor: Option<String>,
    /// Subtrees this listing could not read. Their items are missing from
    /// every page, which says nothing about whether they still exist.
    pub skipped: Vec<DrivePath>,
}

/// Consumer of delta pages
#[async_trait::async_trait]
pub trait IDeltaPageHandler: Send {
    /// Handle one page; `is_last` is set on the final page of the listing
    async fn handle_page(&mut self, items: Vec<DriveItem>, is_last: bool) -> anyhow::Result<()>;

    /// Subtrees the listing had to leave out; called before the page that
    /// reports them
    fn skip_subtrees(&mut self, _paths: &[DrivePath]) {}
}

// ============================================================================
// Drive proxy
// ============================================================================

/// Port for one storage endpoint
#[async_trait::async_trait]
pub trait IDriveProxy: Send + Sync {
    /// Display identifier; also the namespace of this drive's persisted state
    fn name(&self) -> &str;

    /// Whether the drive lives on this machine
    fn is_local(&self) -> bool {
        false
    }

    /// Fetch one page of the full listing.
    ///
    /// `None` starts a new listing and invalidates any previous cursor.
    async fn delta_page(&self, cursor: Option<&str>) -> Result<DeltaPage, DriveError>;

    /// Stream the full listing through `handler`, one page at a time.
    ///
    /// Each page is awaited and handed over before the next is requested.
    ///
    /// # Errors
    /// Returns the first drive or handler error; later pages are not fetched.
    async fn process_delta(&self, handler: &mut dyn IDeltaPageHandler) -> anyhow::Result<()> {
        let mut cursor: Option<String> = None;
        loop {
            let DeltaPage {
                items,
                next_cursor,
                skipped,
            } = self.delta_page(cursor.as_deref()).await?;
            if !skipped.is_empty() {
                handler.skip_subtrees(&skipped);
            }
            let is_last = next_cursor.is_none();
            handler.handle_page(items, is_last).await?;
            match next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(()),
            }
        }
    }

    /// Collect the full listing into memory
    async fn list_all(&self) -> Result<Vec<DriveItem>, DriveError> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let DeltaPage {
                items, next_cursor, ..
            } = self.delta_page(cursor.as_deref()).await?;
            all.extend(items);
            match next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(all),
            }
        }
    }

    /// Create the item, or replace its content if it exists.
    ///
    /// Files require `content`; folders ignore it. The stored item carries the
    /// given `last_modified` time.
    async fn create_or_update(
        &self,
        item: &DriveItem,
        content: Option<ContentStream>,
    ) -> Result<DriveItem, DriveError>;

    /// Move `old` to the path of `new`.
    ///
    /// # Errors
    /// `DriveError::MoveDestinationExists` when the destination is occupied;
    /// the source is left untouched in that case.
    async fn move_item(&self, old: &DriveItem, new: &DriveItem) -> Result<DriveItem, DriveError>;

    /// Delete the item (folders recursively)
    async fn delete(&self, item: &DriveItem) -> Result<(), DriveError>;

    async fn exists(&self, item: &DriveItem) -> Result<bool, DriveError>;

    /// Current item metadata as stored on this drive, `None` if absent
    async fn get_item(&self, item: &DriveItem) -> Result<Option<DriveItem>, DriveError>;

    async fn get_last_write_time_utc(&self, item: &DriveItem) -> Result<DateTime<Utc>, DriveError>;

    async fn get_content_hash(&self, item: &DriveItem) -> Result<String, DriveError>;

    /// Handle for fetching the content; may expire
    async fn get_download_locator(&self, item: &DriveItem) -> Result<DownloadLocator, DriveError>;

    /// Materialize content from a locator.
    ///
    /// # Errors
    /// `DriveError::LocatorExpired` if the locator can no longer be used.
    async fn open_content(&self, locator: &DownloadLocator) -> Result<ContentStream, DriveError>;
}
