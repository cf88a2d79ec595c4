//! Synchronization engine
//!
//! The [`SyncEngine`] reconciles two drives. One pass consists of:
//!
//! 1. **Transfer phases**: the source drive's full listing is streamed page by
//!    page. Every item is classified against the source's persisted state and
//!    the result is applied to the target. Two-way mode runs
//!    primary → secondary and then secondary → primary; echo mode only runs
//!    primary → secondary.
//! 2. **Vanished detection**: after a complete listing, persisted source states
//!    that were not observed are applied as deletions, files before folders.
//!    States under subtrees the listing could not read are left alone.
//! 3. **Echo pruning** (echo mode only): mirror items with no counterpart in
//!    the authoritative listing are deleted, files first, deepest folders last.
//! 4. **Conflict sweep**: open conflicts whose copy was removed are closed.
//!
//! Paths that failed in the primary → secondary phase are held back in the
//! reverse phase of the same pass, so a refused operation never comes back
//! as a write onto the drive it was refused for.
//!
//! ## Page processing
//!
//! Within a page, folders are applied one at a time, shallowest first. Files
//! are then applied concurrently, bounded by `max_concurrent_transfers`.
//! Deleted folders go last, deepest first. The state store is flushed after
//! every page. A single item transfer always finishes together with its state
//! writes; cancellation is only checked between items and between pages.
//!
//! ## Identity
//!
//! States are keyed by drive id where the drive has ids. An item appearing at
//! a path still bound to another key retires that binding when the old item is
//! gone from the drive; if the old item still exists elsewhere the new one
//! fails with an identity violation and is picked up on the next pass.
//!
//! ## Failures
//!
//! Per-item failures are collected in the [`SyncReport`] and the pass goes on.
//! State store failures, cancellation and configuration errors abort the pass.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashSet;
use echodrive_conflict::ConflictResolver;
use echodrive_core::config::SyncConfig;
use echodrive_core::domain::{
    classify, ChangeClassification, DomainError, DriveChangedNotification, DriveItem, DrivePath,
    truncate_to_seconds, ItemKind, RemoteState, SyncMode,
};
use echodrive_core::ports::{DriveError, IDeltaPageHandler, IDriveProxy, IStateRepository};
use echodrive_core::usecases::{copy_item, TransferOutcome};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::events::{EventBus, SyncEvent};
use crate::ledger::StateLedger;
use crate::scheduler::SyncScheduler;
use crate::SyncError;

// ============================================================================
// Options and report
// ============================================================================

/// Engine settings
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub mode: SyncMode,
    /// Upper bound on concurrent file transfers within one page
    pub max_concurrent_transfers: usize,
    /// Interval between passes when running continuously
    pub poll_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::TwoWay,
            max_concurrent_transfers: 4,
            poll_interval: Duration::from_secs(60),
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            mode: config.mode,
            max_concurrent_transfers: config.max_concurrent_transfers.max(1),
            poll_interval: Duration::from_secs(config.poll_interval.max(1)),
        }
    }
}

/// An item that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Drive the item was observed on
    pub drive: String,
    pub path: String,
    pub error: String,
}

/// Summary of one pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub renamed: usize,
    pub unchanged: usize,
    pub conflicts_created: usize,
    pub conflicts_resolved: usize,
    pub pruned: usize,
    pub failures: Vec<ItemFailure>,
    pub duration_ms: u64,
}

impl SyncReport {
    /// Whether every item was applied
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of items that changed a drive
    #[must_use]
    pub fn applied(&self) -> usize {
        self.created + self.updated + self.deleted + self.renamed + self.pruned
    }

    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Created => self.created += 1,
            ItemOutcome::Updated => self.updated += 1,
            ItemOutcome::Deleted => self.deleted += 1,
            ItemOutcome::Renamed => self.renamed += 1,
            ItemOutcome::Unchanged | ItemOutcome::Preserved => self.unchanged += 1,
            ItemOutcome::Conflicted => {
                self.conflicts_created += 1;
                self.updated += 1;
            }
        }
    }
}

/// What applying one item did to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Created,
    Updated,
    Deleted,
    Renamed,
    Unchanged,
    /// Source version applied after preserving the target's as a conflict copy
    Conflicted,
    /// Deletion skipped because the target was edited independently
    Preserved,
}

/// Items seen during one source listing
#[derive(Debug, Default)]
struct Observed {
    keys: DashSet<String>,
    paths: DashSet<DrivePath>,
    /// Subtrees the listing could not read
    unreadable: DashSet<DrivePath>,
    /// Paths whose item could not be applied
    failed: DashSet<DrivePath>,
}

fn covers(set: &DashSet<DrivePath>, path: &DrivePath) -> bool {
    set.iter().any(|p| *p == *path || p.is_ancestor_of(path))
}

impl Observed {
    fn mark(&self, item: &DriveItem) {
        if !item.deleted {
            self.keys.insert(item.key());
            self.paths.insert(item.path.clone());
        }
    }

    fn is_unreadable(&self, path: &DrivePath) -> bool {
        covers(&self.unreadable, path)
    }

    fn has_failed(&self, path: &DrivePath) -> bool {
        covers(&self.failed, path)
    }
}

/// Target listing shared by the deletions of one vanished batch.
///
/// Taken once on first use; paths deleted during the batch are masked out.
#[derive(Debug, Default)]
struct TargetListing {
    items: Option<Vec<DriveItem>>,
    removed: Vec<DrivePath>,
}

impl TargetListing {
    async fn descendants(
        &mut self,
        target: &dyn IDriveProxy,
        folder: &DrivePath,
    ) -> Result<Vec<DriveItem>, DriveError> {
        if self.items.is_none() {
            self.items = Some(target.list_all().await?);
        }
        let removed = &self.removed;
        Ok(self
            .items
            .iter()
            .flatten()
            .filter(|i| folder.is_ancestor_of(&i.path))
            .filter(|i| !removed.iter().any(|r| *r == i.path || r.is_ancestor_of(&i.path)))
            .cloned()
            .collect())
    }
}

/// Files first, then folders from the deepest up
fn deletion_order(a: &RemoteState, b: &RemoteState) -> std::cmp::Ordering {
    let rank = |s: &RemoteState| (s.kind == ItemKind::Folder, std::cmp::Reverse(s.path.depth()));
    rank(a).cmp(&rank(b))
}

fn into_sync_error(err: anyhow::Error) -> SyncError {
    match err.downcast::<SyncError>() {
        Ok(sync) => sync,
        Err(err) => match err.downcast::<DriveError>() {
            Ok(drive) => SyncError::Drive(drive),
            Err(other) => SyncError::Drive(DriveError::Other(other)),
        },
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Two-drive synchronization engine
pub struct SyncEngine {
    primary: Arc<dyn IDriveProxy>,
    secondary: Arc<dyn IDriveProxy>,
    state: Arc<StateLedger>,
    resolver: ConflictResolver,
    options: SyncOptions,
    events: EventBus,
    shutdown: Mutex<CancellationToken>,
    pass_lock: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    /// Creates an engine over `primary` and `secondary`.
    ///
    /// In echo mode `primary` is authoritative. All state writes go through a
    /// single-writer [`StateLedger`] around `state`.
    pub fn new(
        primary: Arc<dyn IDriveProxy>,
        secondary: Arc<dyn IDriveProxy>,
        state: Arc<dyn IStateRepository>,
        options: SyncOptions,
    ) -> Self {
        let ledger = Arc::new(StateLedger::new(state));
        let resolver = ConflictResolver::new(Arc::clone(&ledger) as Arc<dyn IStateRepository>);

        Self {
            primary,
            secondary,
            state: ledger,
            resolver,
            options,
            events: EventBus::new(),
            shutdown: Mutex::new(CancellationToken::new()),
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Receive progress events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn current_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_cancelled(cancel: &CancellationToken) -> Result<(), SyncError> {
        if cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn check_drives(&self) -> Result<(), SyncError> {
        if self.primary.name() == self.secondary.name() {
            return Err(SyncError::Configuration(format!(
                "both drives are named '{}'",
                self.primary.name()
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Continuous operation
    // ------------------------------------------------------------------------

    /// Run continuously: one pass now, then one per notification batch or
    /// poll interval, until [`SyncEngine::stop`] is called.
    pub fn start(
        self: &Arc<Self>,
        notifications: mpsc::Receiver<Vec<DriveChangedNotification>>,
    ) -> JoinHandle<()> {
        let token = CancellationToken::new();
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();

        let scheduler = SyncScheduler::new(Arc::clone(self), notifications, token);
        tokio::spawn(scheduler.run())
    }

    /// Cancel the running pass and the continuous loop
    pub fn stop(&self) {
        let mut token = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
        info!("Sync engine stop requested");
    }

    // ------------------------------------------------------------------------
    // Passes
    // ------------------------------------------------------------------------

    /// Run one full pass.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Configuration` for drives with equal names,
    /// `SyncError::Persistence` if the state store fails, `SyncError::Drive`
    /// if a listing cannot be read, and `SyncError::Cancelled` after `stop`.
    #[instrument(skip(self), fields(mode = %self.options.mode))]
    pub async fn synchronize(&self) -> Result<SyncReport, SyncError> {
        self.check_drives()?;
        let _pass = self.pass_lock.lock().await;
        let cancel = self.current_token();
        let started = Instant::now();
        let mut report = SyncReport::default();

        info!(
            primary = self.primary.name(),
            secondary = self.secondary.name(),
            "Starting synchronization pass"
        );

        if let Err(err) = self.run_pass(&cancel, &mut report).await {
            error!(error = %err, "Synchronization pass aborted");
            return Err(err);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            renamed = report.renamed,
            conflicts = report.conflicts_created,
            resolved = report.conflicts_resolved,
            pruned = report.pruned,
            failures = report.failures.len(),
            duration_ms = report.duration_ms,
            "Synchronization pass completed"
        );
        self.events.publish(SyncEvent::PassCompleted {
            report: report.clone(),
        });
        Ok(report)
    }

    /// Run only the conflict sweep.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Persistence` if the state store fails.
    pub async fn resolve_conflicts(&self) -> Result<SyncReport, SyncError> {
        self.check_drives()?;
        let _pass = self.pass_lock.lock().await;
        let started = Instant::now();
        let mut report = SyncReport::default();

        self.sweep_conflicts(&mut report).await?;
        self.state.flush().await.map_err(SyncError::Persistence)?;

        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    async fn run_pass(
        &self,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let primary = self.primary.as_ref();
        let secondary = self.secondary.as_ref();

        match self.options.mode {
            SyncMode::TwoWay => {
                let first = self
                    .transfer_phase(primary, secondary, None, cancel, report)
                    .await?;
                self.transfer_phase(secondary, primary, Some(&first), cancel, report)
                    .await?;
            }
            SyncMode::Echo => {
                let observed = self
                    .transfer_phase(primary, secondary, None, cancel, report)
                    .await?;
                self.prune_mirror(secondary, &observed, cancel, report).await?;
            }
        }

        Self::check_cancelled(cancel)?;
        self.sweep_conflicts(report).await?;
        self.state.flush().await.map_err(SyncError::Persistence)
    }

    /// Stream `source`'s listing and apply it to `target`.
    ///
    /// Paths that failed in `reverse`, the opposite phase of this pass, are
    /// observed but not applied.
    #[instrument(skip_all, fields(source = source.name(), target = target.name()))]
    async fn transfer_phase(
        &self,
        source: &dyn IDriveProxy,
        target: &dyn IDriveProxy,
        reverse: Option<&Observed>,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<Observed, SyncError> {
        self.events.publish(SyncEvent::PassStarted {
            source: source.name().to_string(),
            target: target.name().to_string(),
        });

        let observed = Observed::default();
        let mut handler = PageHandler {
            engine: self,
            source,
            target,
            cancel,
            observed: &observed,
            held: reverse,
            report: &mut *report,
            pages: 0,
        };
        source
            .process_delta(&mut handler)
            .await
            .map_err(into_sync_error)?;
        debug!(
            pages = handler.pages,
            observed = observed.keys.len(),
            unreadable = observed.unreadable.len(),
            "Listing processed"
        );

        self.apply_vanished(source, target, &observed, cancel, report)
            .await?;
        Ok(observed)
    }

    /// Apply persisted source states that the listing no longer contains
    async fn apply_vanished(
        &self,
        source: &dyn IDriveProxy,
        target: &dyn IDriveProxy,
        observed: &Observed,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let (rebound, mut vanished): (Vec<RemoteState>, Vec<RemoteState>) = self
            .state
            .list_states(source.name())
            .await
            .map_err(SyncError::Persistence)?
            .into_iter()
            .filter(|s| !observed.keys.contains(&s.key) && !observed.is_unreadable(&s.path))
            .partition(|s| observed.paths.contains(&s.path));

        // Another item now lives at these paths; only the binding is stale
        for state in rebound {
            debug!(
                drive = source.name(),
                path = %state.path,
                key = %state.key,
                "Dropping stale binding"
            );
            self.state
                .delete_state(source.name(), &state.key)
                .await
                .map_err(SyncError::Persistence)?;
        }
        if vanished.is_empty() {
            return self.state.flush().await.map_err(SyncError::Persistence);
        }

        vanished.sort_by(deletion_order);
        debug!(count = vanished.len(), "Applying vanished items");

        let mut listing = TargetListing::default();
        for state in vanished {
            Self::check_cancelled(cancel)?;
            let tombstone = state.to_item().into_tombstone();
            let result = self
                .apply_item_with(source, target, &tombstone, &mut listing)
                .await;
            if matches!(result, Ok(ItemOutcome::Deleted)) {
                listing.removed.push(state.path.clone());
            }
            self.settle(report, observed, source, &tombstone, result)?;
        }

        self.state.flush().await.map_err(SyncError::Persistence)
    }

    /// Delete mirror items the authoritative listing does not contain
    #[instrument(skip_all, fields(mirror = mirror.name()))]
    async fn prune_mirror(
        &self,
        mirror: &dyn IDriveProxy,
        observed: &Observed,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let mut orphans: Vec<DriveItem> = mirror
            .list_all()
            .await?
            .into_iter()
            .filter(|item| {
                !observed.paths.contains(&item.path) && !observed.is_unreadable(&item.path)
            })
            .collect();
        orphans.sort_by_key(|item| (item.is_folder(), std::cmp::Reverse(item.path.depth())));

        let mut removed: HashSet<DrivePath> = HashSet::new();
        for orphan in orphans {
            Self::check_cancelled(cancel)?;

            // Already gone with a folder pruned earlier in this loop
            if removed.iter().any(|r| r.is_ancestor_of(&orphan.path)) {
                continue;
            }

            match mirror.delete(&orphan).await {
                Ok(()) | Err(DriveError::NotFound(_)) => {
                    self.state
                        .delete_state(mirror.name(), &orphan.key())
                        .await
                        .map_err(SyncError::Persistence)?;
                    info!(path = %orphan.path, "Pruned orphan from mirror");
                    self.events.publish(SyncEvent::ItemApplied {
                        drive: mirror.name().to_string(),
                        path: orphan.path.clone(),
                        classification: ChangeClassification::Deleted,
                    });
                    report.pruned += 1;
                    removed.insert(orphan.path);
                }
                Err(err) => {
                    self.absorb(report, mirror, &orphan, Err(err.into()))?;
                }
            }
        }

        self.state.flush().await.map_err(SyncError::Persistence)
    }

    async fn sweep_conflicts(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let sweep = self
            .resolver
            .sweep(self.primary.as_ref(), self.secondary.as_ref())
            .await?;

        for (conflict, outcome) in &sweep.outcomes {
            if outcome.is_resolved() {
                self.events.publish(SyncEvent::ConflictResolved {
                    drive: conflict.drive.clone(),
                    path: conflict.original_path.clone(),
                });
            }
        }
        report.conflicts_resolved += sweep.resolved();

        for (conflict, err) in sweep.failures {
            report.failures.push(ItemFailure {
                drive: conflict.drive,
                path: conflict.original_path.to_string(),
                error: err.to_string(),
            });
        }
        Ok(())
    }

    /// Fold one item result into the report; fatal errors are returned
    fn absorb(
        &self,
        report: &mut SyncReport,
        source: &dyn IDriveProxy,
        item: &DriveItem,
        result: Result<ItemOutcome, SyncError>,
    ) -> Result<(), SyncError> {
        match result {
            Ok(outcome) => {
                report.record(outcome);
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(drive = source.name(), path = %item.path, error = %err, "Item failed");
                self.events.publish(SyncEvent::ItemFailed {
                    drive: source.name().to_string(),
                    path: item.path.clone(),
                    error: err.to_string(),
                });
                report.failures.push(ItemFailure {
                    drive: source.name().to_string(),
                    path: item.path.to_string(),
                    error: err.to_string(),
                });
                Ok(())
            }
        }
    }

    /// [`SyncEngine::absorb`], remembering failed paths in `observed`
    fn settle(
        &self,
        report: &mut SyncReport,
        observed: &Observed,
        source: &dyn IDriveProxy,
        item: &DriveItem,
        result: Result<ItemOutcome, SyncError>,
    ) -> Result<(), SyncError> {
        if result.is_err() {
            observed.failed.insert(item.path.clone());
        }
        self.absorb(report, source, item, result)
    }

    // ------------------------------------------------------------------------
    // Item application
    // ------------------------------------------------------------------------

    /// Classify `item` observed on `source` and apply it to `target`
    async fn apply_item(
        &self,
        source: &dyn IDriveProxy,
        target: &dyn IDriveProxy,
        item: &DriveItem,
    ) -> Result<ItemOutcome, SyncError> {
        self.apply_item_with(source, target, item, &mut TargetListing::default())
            .await
    }

    async fn apply_item_with(
        &self,
        source: &dyn IDriveProxy,
        target: &dyn IDriveProxy,
        item: &DriveItem,
        listing: &mut TargetListing,
    ) -> Result<ItemOutcome, SyncError> {
        let old = self
            .state
            .get_state(source.name(), &item.key())
            .await
            .map_err(SyncError::Persistence)?;
        if old.is_none() && !item.deleted {
            self.retire_stale_binding(source, item).await?;
        }
        let classification = classify(old.as_ref(), item)?;

        let outcome = match (classification, old) {
            (ChangeClassification::None, _) if self.options.mode == SyncMode::Echo => {
                self.apply_upsert(source, target, item, classification).await?
            }
            (ChangeClassification::None, _) => ItemOutcome::Unchanged,
            (ChangeClassification::Created | ChangeClassification::Changed, _) => {
                self.apply_upsert(source, target, item, classification).await?
            }
            (ChangeClassification::Deleted, Some(old)) => {
                self.apply_delete(source, target, &old, listing).await?
            }
            (ChangeClassification::Renamed, Some(old)) => {
                self.apply_rename(source, target, &old, item).await?
            }
            (ChangeClassification::Deleted | ChangeClassification::Renamed, None) => {
                ItemOutcome::Unchanged
            }
        };

        if outcome != ItemOutcome::Unchanged {
            debug!(
                source = source.name(),
                target = target.name(),
                path = %item.path,
                %classification,
                ?outcome,
                "Item applied"
            );
            self.events.publish(SyncEvent::ItemApplied {
                drive: target.name().to_string(),
                path: item.path.clone(),
                classification,
            });
        }
        Ok(outcome)
    }

    /// Drop the state still bound to `item.path` under another key.
    ///
    /// # Errors
    ///
    /// `DomainError::IdentityViolation` while the previously bound item still
    /// exists on `source`.
    async fn retire_stale_binding(
        &self,
        source: &dyn IDriveProxy,
        item: &DriveItem,
    ) -> Result<(), SyncError> {
        let Some(stale) = self
            .state
            .find_state_at(source.name(), &item.path)
            .await
            .map_err(SyncError::Persistence)?
        else {
            return Ok(());
        };
        if stale.key == item.key() {
            return Ok(());
        }

        if source.get_item(&stale.to_item()).await?.is_some() {
            return Err(SyncError::Classification(DomainError::IdentityViolation {
                path: item.path.to_string(),
                stored: stale.key,
                observed: item.key(),
            }));
        }

        warn!(
            drive = source.name(),
            path = %item.path,
            stale = %stale.key,
            current = %item.key(),
            "Path now holds a different item, retiring the old binding"
        );
        self.state
            .delete_state(source.name(), &stale.key)
            .await
            .map_err(SyncError::Persistence)
    }

    async fn persist(&self, outcome: &TransferOutcome) -> Result<(), SyncError> {
        self.state
            .upsert_state(&outcome.source_state)
            .await
            .map_err(SyncError::Persistence)?;
        self.state
            .upsert_state(&outcome.target_state)
            .await
            .map_err(SyncError::Persistence)
    }

    /// Record matching states for an item that is already consistent
    async fn persist_pair(
        &self,
        source: &dyn IDriveProxy,
        item: &DriveItem,
        target: &dyn IDriveProxy,
        current: &DriveItem,
    ) -> Result<(), SyncError> {
        let source_hash = source.get_content_hash(item).await?;
        let target_hash = target.get_content_hash(current).await?;
        self.persist(&TransferOutcome {
            target_item: current.clone(),
            source_state: RemoteState::capture(source.name(), item, source_hash, source.is_local()),
            target_state: RemoteState::capture(target.name(), current, target_hash, target.is_local()),
        })
        .await
    }

    /// Created or Changed: write the source version to the target
    async fn apply_upsert(
        &self,
        source: &dyn IDriveProxy,
        target: &dyn IDriveProxy,
        item: &DriveItem,
        classification: ChangeClassification,
    ) -> Result<ItemOutcome, SyncError> {
        let existing = target.get_item(&item.detached()).await?;

        if let Some(current) = &existing {
            if current.kind != item.kind {
                return Err(SyncError::Classification(DomainError::IdentityViolation {
                    path: item.path.to_string(),
                    stored: current.kind.to_string(),
                    observed: item.kind.to_string(),
                }));
            }
            if current.is_folder()
                || truncate_to_seconds(current.last_modified)
                    == truncate_to_seconds(item.last_modified)
            {
                if classification != ChangeClassification::None {
                    self.persist_pair(source, item, target, current).await?;
                }
                return Ok(ItemOutcome::Unchanged);
            }
        }

        let mut conflicted = false;
        if let (Some(current), SyncMode::TwoWay) = (&existing, self.options.mode) {
            let baseline = self
                .state
                .get_state(target.name(), &current.key())
                .await
                .map_err(SyncError::Persistence)?;
            let untouched = baseline.is_some_and(|b| {
                b.path == current.path
                    && b.last_modified == truncate_to_seconds(current.last_modified)
            });

            if !untouched {
                let opened = self
                    .resolver
                    .preserve_foreign_version(target, current)
                    .await?;
                if let Some(conflict) = opened {
                    self.events.publish(SyncEvent::ConflictCreated {
                        drive: conflict.drive,
                        original: conflict.original_path,
                        conflict: conflict.conflict_path,
                    });
                    conflicted = true;
                }
            }
        }

        let outcome = copy_item(source, target, item).await?;
        self.persist(&outcome).await?;

        Ok(match (conflicted, existing.is_some()) {
            (true, _) => ItemOutcome::Conflicted,
            (false, true) => ItemOutcome::Updated,
            (false, false) => ItemOutcome::Created,
        })
    }

    /// Deleted: remove the item from the target unless it was edited there
    async fn apply_delete(
        &self,
        source: &dyn IDriveProxy,
        target: &dyn IDriveProxy,
        old: &RemoteState,
        listing: &mut TargetListing,
    ) -> Result<ItemOutcome, SyncError> {
        let probe = old.to_item().detached();
        let existing = target.get_item(&probe).await?;

        let outcome = match existing {
            None => {
                debug!(target = target.name(), path = %old.path, "Already absent on target");
                self.state
                    .delete_state(target.name(), &probe.key())
                    .await
                    .map_err(SyncError::Persistence)?;
                ItemOutcome::Unchanged
            }
            Some(current) => {
                let baseline = self
                    .state
                    .get_state(target.name(), &current.key())
                    .await
                    .map_err(SyncError::Persistence)?;

                if self.options.mode == SyncMode::TwoWay
                    && self
                        .edited_since(target, &current, baseline.as_ref(), listing)
                        .await?
                {
                    warn!(
                        target = target.name(),
                        path = %current.path,
                        "Target edited since last sync, keeping it instead of deleting"
                    );
                    // Forget both sides so the reverse phase copies it back
                    self.state
                        .delete_state(source.name(), &old.key)
                        .await
                        .map_err(SyncError::Persistence)?;
                    if let Some(baseline) = baseline {
                        self.state
                            .delete_state(target.name(), &baseline.key)
                            .await
                            .map_err(SyncError::Persistence)?;
                    }
                    return Ok(ItemOutcome::Preserved);
                }

                match target.delete(&current).await {
                    Ok(()) | Err(DriveError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
                self.state
                    .delete_state(target.name(), &current.key())
                    .await
                    .map_err(SyncError::Persistence)?;
                ItemOutcome::Deleted
            }
        };

        self.state
            .delete_state(source.name(), &old.key)
            .await
            .map_err(SyncError::Persistence)?;
        Ok(outcome)
    }

    /// Whether `current` on `target` changed since its baseline.
    ///
    /// Folder timestamps move with every child write, so a folder counts as
    /// edited when anything below it is unknown or edited.
    async fn edited_since(
        &self,
        target: &dyn IDriveProxy,
        current: &DriveItem,
        baseline: Option<&RemoteState>,
        listing: &mut TargetListing,
    ) -> Result<bool, SyncError> {
        if !current.is_folder() {
            return Ok(baseline
                .map_or(true, |b| b.last_modified != truncate_to_seconds(current.last_modified)));
        }
        if baseline.is_none() {
            return Ok(true);
        }

        for child in listing.descendants(target, &current.path).await? {
            let child_baseline = self
                .state
                .get_state(target.name(), &child.key())
                .await
                .map_err(SyncError::Persistence)?;
            let edited = match child_baseline {
                None => true,
                Some(b) => {
                    child.is_file() && b.last_modified != truncate_to_seconds(child.last_modified)
                }
            };
            if edited {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Renamed: move the target item, refusing an occupied destination
    async fn apply_rename(
        &self,
        source: &dyn IDriveProxy,
        target: &dyn IDriveProxy,
        old: &RemoteState,
        item: &DriveItem,
    ) -> Result<ItemOutcome, SyncError> {
        let from = old.to_item().detached();
        let to = item.detached();
        let at_old_path = target.get_item(&from).await?;

        if let Some(at_new_path) = target.get_item(&to).await? {
            if at_old_path.is_none()
                && self
                    .already_moved(source, target, old, item, &at_new_path)
                    .await?
            {
                self.persist_pair(source, item, target, &at_new_path).await?;
                return Ok(ItemOutcome::Renamed);
            }
            return Err(DriveError::MoveDestinationExists(item.path.to_string()).into());
        }

        let Some(current) = at_old_path else {
            let outcome = copy_item(source, target, item).await?;
            self.persist(&outcome).await?;
            return Ok(ItemOutcome::Created);
        };

        let moved = target
            .move_item(&current, &current.relocated(item.path.clone()))
            .await?;
        self.state
            .delete_state(target.name(), &current.key())
            .await
            .map_err(SyncError::Persistence)?;
        self.persist_pair(source, item, target, &moved).await?;
        Ok(ItemOutcome::Renamed)
    }

    /// Whether `occupant`, found at the rename destination on `target`, is
    /// the renamed item itself.
    ///
    /// That holds when a folder move carried it there (same name, new parent,
    /// same modification time) or when both sides hold the same content.
    async fn already_moved(
        &self,
        source: &dyn IDriveProxy,
        target: &dyn IDriveProxy,
        old: &RemoteState,
        item: &DriveItem,
        occupant: &DriveItem,
    ) -> Result<bool, SyncError> {
        if occupant.kind != item.kind {
            return Ok(false);
        }
        let carried = old.path.file_name() == item.path.file_name()
            && old.path.parent() != item.path.parent();
        if occupant.is_folder() {
            return Ok(carried);
        }
        let same_time =
            truncate_to_seconds(occupant.last_modified) == truncate_to_seconds(item.last_modified);
        if carried && same_time {
            return Ok(true);
        }

        let source_hash = source.get_content_hash(item).await?;
        let target_hash = target.get_content_hash(occupant).await?;
        Ok(source_hash == target_hash)
    }
}

// ============================================================================
// Page handler
// ============================================================================

struct PageHandler<'a> {
    engine: &'a SyncEngine,
    source: &'a dyn IDriveProxy,
    target: &'a dyn IDriveProxy,
    cancel: &'a CancellationToken,
    observed: &'a Observed,
    /// Listing of the opposite phase, whose failed paths are not applied
    held: Option<&'a Observed>,
    report: &'a mut SyncReport,
    pages: usize,
}

impl PageHandler<'_> {
    fn is_held(&self, item: &DriveItem) -> bool {
        let held = self.held.is_some_and(|reverse| reverse.has_failed(&item.path));
        if held {
            debug!(
                source = self.source.name(),
                path = %item.path,
                "Held back, failed in the opposite direction"
            );
        }
        held
    }
}

#[async_trait::async_trait]
impl IDeltaPageHandler for PageHandler<'_> {
    async fn handle_page(&mut self, items: Vec<DriveItem>, is_last: bool) -> anyhow::Result<()> {
        SyncEngine::check_cancelled(self.cancel)?;
        self.pages += 1;
        debug!(page = self.pages, items = items.len(), is_last, "Processing page");

        for item in &items {
            self.observed.mark(item);
        }
        let items: Vec<DriveItem> = items.into_iter().filter(|i| !self.is_held(i)).collect();

        let (mut folders, rest): (Vec<DriveItem>, Vec<DriveItem>) = items
            .into_iter()
            .partition(|i| i.is_folder() && !i.deleted);
        let (mut deleted_folders, files): (Vec<DriveItem>, Vec<DriveItem>) =
            rest.into_iter().partition(|i| i.is_folder());
        folders.sort_by_key(|i| i.path.depth());
        deleted_folders.sort_by_key(|i| std::cmp::Reverse(i.path.depth()));

        let engine = self.engine;
        let (source, target) = (self.source, self.target);

        let observed = self.observed;
        for folder in folders {
            SyncEngine::check_cancelled(self.cancel)?;
            let result = engine.apply_item(source, target, &folder).await;
            engine.settle(self.report, observed, source, &folder, result)?;
        }

        let cancel = self.cancel;
        let results: Vec<(DriveItem, Result<ItemOutcome, SyncError>)> = stream::iter(files)
            .map(|item| async move {
                if cancel.is_cancelled() {
                    return (item, Err(SyncError::Cancelled));
                }
                let result = engine.apply_item(source, target, &item).await;
                (item, result)
            })
            .buffer_unordered(engine.options.max_concurrent_transfers.max(1))
            .collect()
            .await;
        for (item, result) in results {
            engine.settle(self.report, observed, source, &item, result)?;
        }

        for folder in deleted_folders {
            SyncEngine::check_cancelled(self.cancel)?;
            let result = engine.apply_item(source, target, &folder).await;
            engine.settle(self.report, observed, source, &folder, result)?;
        }

        engine
            .state
            .flush()
            .await
            .map_err(SyncError::Persistence)?;
        Ok(())
    }

    fn skip_subtrees(&mut self, paths: &[DrivePath]) {
        for path in paths {
            warn!(drive = self.source.name(), path = %path, "Subtree unreadable, leaving it as is");
            self.observed.unreadable.insert(path.clone());
        }
    }
}
