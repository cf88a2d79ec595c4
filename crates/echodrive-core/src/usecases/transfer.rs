//! Item transfer between two drives
//!
//! Content is materialized from the source through a download locator. A
//! locator that has expired is refreshed from the source and the open is
//! retried exactly once; a second failure is returned to the caller.

use crate::domain::{ContentStream, DriveItem, RemoteState};
use crate::ports::{DriveError, IDriveProxy};

/// Result of a successful [`copy_item`]
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// Item as stored on the target
    pub target_item: DriveItem,
    /// New snapshot of the source item
    pub source_state: RemoteState,
    /// New snapshot of the target item
    pub target_state: RemoteState,
}

/// Open the content of `item` on `drive`.
///
/// Uses the locator carried by the item when present, otherwise asks the
/// drive for one.
///
/// # Errors
///
/// Returns `DriveError::LocatorExpired` only if the refreshed locator has
/// expired as well; any other error is returned without a retry.
pub async fn fetch_content(
    drive: &dyn IDriveProxy,
    item: &DriveItem,
) -> Result<ContentStream, DriveError> {
    let locator = match &item.locator {
        Some(locator) => locator.clone(),
        None => drive.get_download_locator(item).await?,
    };

    match drive.open_content(&locator).await {
        Err(err) if err.is_transient() => {
            let refreshed = drive.get_download_locator(item).await?;
            drive.open_content(&refreshed).await
        }
        other => other,
    }
}

/// Create or update `item` from `source` on `target`.
///
/// Folders are created without content. The target resolves the item by
/// path; the returned outcome holds the states both drives should persist.
///
/// # Errors
///
/// Returns the first drive error; the target is left as the drive's own
/// atomic write guarantees.
pub async fn copy_item(
    source: &dyn IDriveProxy,
    target: &dyn IDriveProxy,
    item: &DriveItem,
) -> Result<TransferOutcome, DriveError> {
    if item.is_folder() {
        let target_item = target.create_or_update(&item.detached(), None).await?;
        return Ok(TransferOutcome {
            source_state: RemoteState::capture(source.name(), item, "", source.is_local()),
            target_state: RemoteState::capture(target.name(), &target_item, "", target.is_local()),
            target_item,
        });
    }

    let content = fetch_content(source, item).await?;
    let target_item = target.create_or_update(&item.detached(), Some(content)).await?;

    let source_hash = source.get_content_hash(item).await?;
    let target_hash = target.get_content_hash(&target_item).await?;

    Ok(TransferOutcome {
        source_state: RemoteState::capture(source.name(), item, source_hash, source.is_local()),
        target_state: RemoteState::capture(
            target.name(),
            &target_item,
            target_hash,
            target.is_local(),
        ),
        target_item,
    })
}
