//! Conflict-copy creation and the resolution sweep
//!
//! ## Lifecycle
//!
//! 1. A two-way transfer finds the target modified independently. The target's
//!    current version is copied to a conflict-copy path on the target and a
//!    [`Conflict`] record is saved. The caller then writes the source version
//!    to the canonical path, so both versions exist side by side. A conflict
//!    copy that diverged itself gets a sibling copy named after the original
//!    file, never a nested name, and opens no record of its own.
//! 2. Once per pass the sweep visits every open conflict on the drive that
//!    holds it:
//!    - canonical file missing: left for the user
//!    - conflict copy still present: left for the user
//!    - conflict copy removed: if the canonical content differs from the last
//!      persisted hash it is re-uploaded to the other drive; the record is
//!      deleted in both cases

use std::sync::Arc;

use chrono::Utc;
use echodrive_core::domain::{Conflict, DriveItem};
use echodrive_core::ports::{IDriveProxy, IStateRepository};
use echodrive_core::usecases::{copy_item, fetch_content};
use tracing::{debug, info, warn};

use crate::error::ConflictError;
use crate::namer::{ConflictNamer, MAX_SUFFIX};

/// What the sweep did with one conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Canonical file is gone; needs human action
    CanonicalMissing,
    /// Conflict copy still exists; needs human action
    CopyPresent,
    /// Copy removed and canonical content unchanged; record deleted
    Closed,
    /// Copy removed and canonical content edited; re-uploaded and record deleted
    Reuploaded,
}

impl SweepOutcome {
    /// Whether the conflict record was deleted
    pub fn is_resolved(&self) -> bool {
        matches!(self, SweepOutcome::Closed | SweepOutcome::Reuploaded)
    }
}

/// Result of one sweep over all open conflicts
#[derive(Debug, Default)]
pub struct SweepReport {
    pub outcomes: Vec<(Conflict, SweepOutcome)>,
    /// Conflicts whose drive operations failed; they stay open
    pub failures: Vec<(Conflict, ConflictError)>,
}

impl SweepReport {
    pub fn resolved(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_resolved()).count()
    }
}

/// Creates conflict copies and resolves them once the user has acted
pub struct ConflictResolver {
    state: Arc<dyn IStateRepository>,
}

impl ConflictResolver {
    /// Creates a resolver writing through `state`
    ///
    /// Writes from concurrent transfers must already be serialized by `state`.
    pub fn new(state: Arc<dyn IStateRepository>) -> Self {
        Self { state }
    }

    /// Preserve the version of `foreign` currently stored on `target`.
    ///
    /// The copy is named after `foreign.last_modified`; if that name is taken,
    /// numbered names are tried in order. Returns the opened [`Conflict`], or
    /// `None` when `foreign` is itself a conflict copy.
    ///
    /// # Errors
    ///
    /// Returns `ConflictError::NoFreeName` when every numbered name is taken,
    /// or the drive/storage error that stopped the copy.
    pub async fn preserve_foreign_version(
        &self,
        target: &dyn IDriveProxy,
        foreign: &DriveItem,
    ) -> Result<Option<Conflict>, ConflictError> {
        let nested = ConflictNamer::is_conflict_copy(&foreign.path);
        let named_after = ConflictNamer::original_path(&foreign.path)
            .unwrap_or_else(|| foreign.path.clone());

        let mut conflict_path = None;
        for suffix in 1..=MAX_SUFFIX {
            let candidate =
                ConflictNamer::conflict_path(&named_after, foreign.last_modified, suffix)?;
            let probe = foreign.detached().relocated(candidate.clone());
            if !target.exists(&probe).await? {
                conflict_path = Some(candidate);
                break;
            }
        }
        let conflict_path =
            conflict_path.ok_or_else(|| ConflictError::NoFreeName(foreign.path.to_string()))?;

        let content = fetch_content(target, foreign).await?;
        let copy = foreign.detached().relocated(conflict_path.clone());
        target.create_or_update(&copy, Some(content)).await?;

        if nested {
            info!(
                drive = target.name(),
                copy = %foreign.path,
                preserved = %conflict_path,
                "Conflict copy diverged, kept its other version alongside"
            );
            return Ok(None);
        }

        let conflict = Conflict::new(target.name(), foreign.path.clone(), conflict_path);
        self.state.save_conflict(&conflict).await?;

        info!(
            drive = target.name(),
            original = %conflict.original_path,
            conflict = %conflict.conflict_path,
            "Preserved independently modified version as conflict copy"
        );
        Ok(Some(conflict))
    }

    /// Run the resolution sweep over every open conflict.
    ///
    /// # Errors
    ///
    /// Only storage failures abort the sweep; drive failures are collected in
    /// the report and leave the conflict open.
    pub async fn sweep(
        &self,
        first: &dyn IDriveProxy,
        second: &dyn IDriveProxy,
    ) -> Result<SweepReport, ConflictError> {
        let mut report = SweepReport::default();

        for conflict in self.state.list_conflicts().await? {
            let (holder, counterpart) = if conflict.drive == first.name() {
                (first, second)
            } else if conflict.drive == second.name() {
                (second, first)
            } else {
                let drive = conflict.drive.clone();
                report
                    .failures
                    .push((conflict, ConflictError::UnknownDrive(drive)));
                continue;
            };

            match self.resolve(&conflict, holder, counterpart).await {
                Ok(outcome) => {
                    debug!(
                        drive = holder.name(),
                        original = %conflict.original_path,
                        ?outcome,
                        "Swept conflict"
                    );
                    report.outcomes.push((conflict, outcome));
                }
                Err(err) if err.is_storage() => return Err(err),
                Err(err) => {
                    warn!(
                        drive = holder.name(),
                        original = %conflict.original_path,
                        error = %err,
                        "Conflict sweep failed"
                    );
                    report.failures.push((conflict, err));
                }
            }
        }

        Ok(report)
    }

    /// Sweep a single conflict held by `holder`
    pub async fn resolve(
        &self,
        conflict: &Conflict,
        holder: &dyn IDriveProxy,
        counterpart: &dyn IDriveProxy,
    ) -> Result<SweepOutcome, ConflictError> {
        let now = Utc::now();
        let canonical_probe = DriveItem::file(conflict.original_path.clone(), 0, now);
        let Some(canonical) = holder.get_item(&canonical_probe).await? else {
            return Ok(SweepOutcome::CanonicalMissing);
        };

        let copy_probe = DriveItem::file(conflict.conflict_path.clone(), 0, now);
        if holder.exists(&copy_probe).await? {
            return Ok(SweepOutcome::CopyPresent);
        }

        let current_hash = holder.get_content_hash(&canonical).await?;
        let persisted = self.state.get_state(holder.name(), &canonical.key()).await?;
        let edited = persisted.map_or(true, |state| state.content_hash != current_hash);

        if edited {
            let outcome = copy_item(holder, counterpart, &canonical).await?;
            self.state.upsert_state(&outcome.source_state).await?;
            self.state.upsert_state(&outcome.target_state).await?;
            info!(
                from = holder.name(),
                to = counterpart.name(),
                path = %canonical.path,
                "Re-uploaded resolved file"
            );
        }

        self.state
            .delete_conflict(&conflict.drive, &conflict.conflict_path)
            .await?;

        Ok(if edited {
            SweepOutcome::Reuploaded
        } else {
            SweepOutcome::Closed
        })
    }
}
