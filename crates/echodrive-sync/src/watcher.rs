//! Filesystem change watching
//!
//! A [`ChangeWatcher`] turns raw `notify` events under a root into batches of
//! merged [`DriveChangedNotification`]s, one batch per quiet interval.
//!
//! ## Architecture
//!
//! ```text
//!  file watcher ──┐
//!                 ├──→ Mutex<NotificationAccumulator> ──→ flush task ──→ mpsc::Sender
//! folder watcher ─┘           (poke on every event)      (quiet timer)
//! ```
//!
//! Both watchers observe the same root with different filters: the file
//! watcher reacts to file entries, the folder watcher to folder entries. The
//! flush task restarts its quiet timer on every raw event and only drains the
//! accumulator once the tree has been quiet for the whole interval.
//!
//! ## Event mapping
//!
//! - file created, modified, deleted or renamed: `SelfOnly` on its folder
//! - folder created or deleted: `SelfOnly` on the parent, `Descendants` on
//!   the folder
//! - folder renamed: `SelfOnly` on the parent, `Descendants` on both the new
//!   and the old path
//! - folder metadata or timestamp changes: ignored

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use echodrive_core::domain::{DriveChangedNotification, DrivePath};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::merge::{merge_notifications, NotificationAccumulator};

/// Which entries a watcher reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchFilter {
    Files,
    Folders,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Folder,
    /// Gone before it could be inspected
    Unknown,
}

/// State shared by the notify callbacks and the flush task
struct Shared {
    root: PathBuf,
    pending: Mutex<NotificationAccumulator>,
    wake: Notify,
}

/// Watches a directory tree and emits merged change notifications
pub struct ChangeWatcher {
    root: PathBuf,
    _file_watcher: RecommendedWatcher,
    _folder_watcher: RecommendedWatcher,
    shutdown: CancellationToken,
    flush_task: Option<JoinHandle<()>>,
}

impl ChangeWatcher {
    /// Start watching `root` recursively.
    ///
    /// Each batch sent on `tx` is the merged set of notifications collected
    /// since the previous batch. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be resolved or the OS watchers
    /// cannot be created.
    pub fn start(
        root: &Path,
        quiet_interval: Duration,
        tx: mpsc::Sender<Vec<DriveChangedNotification>>,
    ) -> Result<Self> {
        let root = std::fs::canonicalize(root)
            .with_context(|| format!("Failed to resolve watch root {}", root.display()))?;

        info!(
            root = %root.display(),
            quiet_ms = quiet_interval.as_millis() as u64,
            "Starting change watcher"
        );

        let shared = Arc::new(Shared {
            root: root.clone(),
            pending: Mutex::new(NotificationAccumulator::new()),
            wake: Notify::new(),
        });

        let file_watcher = spawn_watcher(Arc::clone(&shared), WatchFilter::Files)?;
        let folder_watcher = spawn_watcher(Arc::clone(&shared), WatchFilter::Folders)?;

        let shutdown = CancellationToken::new();
        let flush_task = tokio::spawn(run_flush_loop(
            shared,
            quiet_interval,
            tx,
            shutdown.clone(),
        ));

        Ok(Self {
            root,
            _file_watcher: file_watcher,
            _folder_watcher: folder_watcher,
            shutdown,
            flush_task: Some(flush_task),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop watching and wait for the flush task to end
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.flush_task.take() {
            let _ = task.await;
        }
        info!(root = %self.root.display(), "Change watcher stopped");
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_watcher(shared: Arc<Shared>, filter: WatchFilter) -> Result<RecommendedWatcher> {
    let root = shared.root.clone();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let notifications = map_event(&shared.root, &event, filter);
                if !notifications.is_empty() {
                    let mut pending = shared
                        .pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    for notification in notifications {
                        pending.add(notification);
                    }
                }
                shared.wake.notify_one();
            }
            Err(err) => {
                error!(error = %err, ?filter, "Change watcher error");
            }
        },
        notify::Config::default(),
    )
    .with_context(|| format!("Failed to create {filter:?} watcher"))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch path: {}", root.display()))?;

    Ok(watcher)
}

/// Drain the accumulator after every quiet interval until shut down
async fn run_flush_loop(
    shared: Arc<Shared>,
    quiet_interval: Duration,
    tx: mpsc::Sender<Vec<DriveChangedNotification>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = shared.wake.notified() => {}
        }

        // Restart the timer on every poke
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = shared.wake.notified() => continue,
                _ = tokio::time::sleep(quiet_interval) => break,
            }
        }

        let batch = {
            let mut pending = shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            merge_notifications(pending.drain())
        };
        if batch.is_empty() {
            continue;
        }

        debug!(count = batch.len(), "Flushing change notifications");
        if tx.send(batch).await.is_err() {
            info!("Notification receiver dropped, stopping flush task");
            return;
        }
    }
}

// ============================================================================
// Event mapping - notify::Event → DriveChangedNotification
// ============================================================================

fn entry_kind(kind: &EventKind, path: &Path) -> EntryKind {
    match kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
            EntryKind::Folder
        }
        EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => {
            EntryKind::File
        }
        _ => match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => EntryKind::Folder,
            Ok(_) => EntryKind::File,
            Err(_) => EntryKind::Unknown,
        },
    }
}

fn push_parent(out: &mut Vec<DriveChangedNotification>, path: &DrivePath) {
    if let Some(parent) = path.parent() {
        out.push(DriveChangedNotification::self_only(parent));
    }
}

/// Convert one raw event into notifications for the given filter
fn map_event(root: &Path, event: &Event, filter: WatchFilter) -> Vec<DriveChangedNotification> {
    let mut out = Vec::new();
    let to_drive = |p: &Path| DrivePath::from_fs_path(root, p);

    match &event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            let (Some(old), Some(new)) = (to_drive(&event.paths[0]), to_drive(&event.paths[1]))
            else {
                return out;
            };
            match (filter, entry_kind(&event.kind, &event.paths[1])) {
                (WatchFilter::Folders, EntryKind::Folder) => {
                    push_parent(&mut out, &new);
                    if old.parent() != new.parent() {
                        push_parent(&mut out, &old);
                    }
                    out.push(DriveChangedNotification::descendants(new));
                    out.push(DriveChangedNotification::descendants(old));
                }
                (WatchFilter::Files, EntryKind::File | EntryKind::Unknown) => {
                    push_parent(&mut out, &old);
                    push_parent(&mut out, &new);
                }
                _ => {}
            }
        }

        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_) => {
            let structural = matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
            );

            for raw in &event.paths {
                let Some(path) = to_drive(raw) else { continue };
                match (filter, entry_kind(&event.kind, raw)) {
                    (WatchFilter::Folders, EntryKind::Folder) if structural => {
                        push_parent(&mut out, &path);
                        out.push(DriveChangedNotification::descendants(path));
                    }
                    (WatchFilter::Files, EntryKind::File | EntryKind::Unknown) => {
                        push_parent(&mut out, &path);
                    }
                    // Folder timestamp and metadata churn
                    _ => {}
                }
            }
        }

        _ => {}
    }

    if !out.is_empty() {
        debug!(kind = ?event.kind, ?filter, count = out.len(), "Mapped watcher event");
    }
    out
}
