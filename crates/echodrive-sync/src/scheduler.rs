//! Continuous synchronization loop
//!
//! Runs one pass on start, then another whenever the change watcher delivers
//! a notification batch or the poll interval elapses, until cancelled.
//! Batches that arrive while a pass is running are coalesced into the next
//! pass; the notifications only say *that* something changed, each pass
//! re-lists the drives anyway.

use std::sync::Arc;

use echodrive_core::domain::DriveChangedNotification;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::SyncEngine;
use crate::SyncError;

pub(crate) struct SyncScheduler {
    engine: Arc<SyncEngine>,
    notifications: mpsc::Receiver<Vec<DriveChangedNotification>>,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    pub(crate) fn new(
        engine: Arc<SyncEngine>,
        notifications: mpsc::Receiver<Vec<DriveChangedNotification>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            notifications,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        let poll_interval = self.engine.options().poll_interval;
        info!(poll_interval_secs = poll_interval.as_secs(), "Sync scheduler started");

        self.run_pass("startup").await;

        let mut poll = tokio::time::interval(poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        poll.tick().await;

        let mut watching = true;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Sync scheduler shutting down");
                    break;
                }
                batch = self.notifications.recv(), if watching => match batch {
                    Some(batch) => {
                        let mut changed = batch.len();
                        while let Ok(more) = self.notifications.try_recv() {
                            changed += more.len();
                        }
                        debug!(folders = changed, "Change notifications received");
                        self.run_pass("change").await;
                        poll.reset();
                    }
                    None => {
                        info!("Change notifications closed, continuing on poll interval");
                        watching = false;
                    }
                },
                _ = poll.tick() => {
                    self.run_pass("poll").await;
                }
            }
        }
    }

    async fn run_pass(&self, trigger: &str) {
        if self.shutdown.is_cancelled() {
            return;
        }

        match self.engine.synchronize().await {
            Ok(report) => info!(
                trigger,
                applied = report.applied(),
                failures = report.failures.len(),
                duration_ms = report.duration_ms,
                "Scheduled pass finished"
            ),
            Err(SyncError::Cancelled) => debug!(trigger, "Scheduled pass cancelled"),
            Err(e) => error!(trigger, error = %e, "Scheduled pass failed"),
        }
    }
}
