//! Progress events
//!
//! The engine publishes what it does on a broadcast channel so that a CLI,
//! daemon or UI can follow a pass without the engine knowing about them.
//! Publishing never blocks; with no subscribers the event is dropped.

use echodrive_core::domain::{ChangeClassification, DrivePath};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::engine::SyncReport;

/// Capacity of the broadcast channel; slow subscribers see `Lagged`
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    PassStarted {
        source: String,
        target: String,
    },
    ItemApplied {
        drive: String,
        path: DrivePath,
        classification: ChangeClassification,
    },
    ConflictCreated {
        drive: String,
        original: DrivePath,
        conflict: DrivePath,
    },
    ConflictResolved {
        drive: String,
        path: DrivePath,
    },
    ItemFailed {
        drive: String,
        path: DrivePath,
        error: String,
    },
    PassCompleted {
        report: SyncReport,
    },
}

/// Sender side owned by the engine
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub(crate) fn publish(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}
