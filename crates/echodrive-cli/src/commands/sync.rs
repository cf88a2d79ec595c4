//! Sync command - Run one synchronization pass
//!
//! Provides the `echodrive sync` CLI command which:
//! 1. Loads configuration, the content key and the state store
//! 2. Builds both drives and the SyncEngine
//! 3. Runs a single pass and prints the report

use anyhow::Result;
use clap::{Args, ValueEnum};
use echodrive_core::domain::SyncMode;
use echodrive_sync::{SyncEvent, SyncReport};
use tracing::info;

use super::{build_engine, reported, CommandContext};
use crate::output::{format_duration, plural, OutputFormatter};

/// Mode override on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    TwoWay,
    Echo,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::TwoWay => SyncMode::TwoWay,
            ModeArg::Echo => SyncMode::Echo,
        }
    }
}

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Override the configured mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
}

impl SyncCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;
        let mode = self.mode.map_or(config.sync.mode, SyncMode::from);

        let engine = match build_engine(&config, mode).await {
            Ok(engine) => engine,
            Err(e) => return Err(reported(&*formatter, e)),
        };

        formatter.info(&format!(
            "Synchronizing {} ({}) with {} ({}) in {} mode",
            config.primary.name,
            config.primary.root.display(),
            config.secondary.name,
            config.secondary.root.display(),
            mode
        ));

        // Surface conflict copies as they are made
        let mut events = engine.subscribe();
        let report = engine.synchronize().await?;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::ConflictCreated { drive, conflict, .. } = event {
                formatter.warn(&format!("Conflict copy created on {drive}: {conflict}"));
            }
        }

        info!(applied = report.applied(), failures = report.failures.len(), "Sync finished");

        if ctx.is_json() {
            formatter.print_json(&serde_json::to_value(&report)?);
        } else {
            print_report(&*formatter, &report);
        }
        Ok(())
    }
}

fn print_report(formatter: &dyn OutputFormatter, report: &SyncReport) {
    if report.applied() == 0 && report.conflicts_created == 0 && report.is_clean() {
        formatter.success("Already up to date");
    } else {
        formatter.success(&format!(
            "Sync completed in {}",
            format_duration(report.duration_ms)
        ));
    }

    let lines = [
        ("Created:  ", report.created),
        ("Updated:  ", report.updated),
        ("Deleted:  ", report.deleted),
        ("Renamed:  ", report.renamed),
        ("Pruned:   ", report.pruned),
        ("Conflicts:", report.conflicts_created),
        ("Resolved: ", report.conflicts_resolved),
    ];
    for (label, count) in lines {
        if count > 0 {
            formatter.info(&format!("{label} {}", plural(count, "item")));
        }
    }

    if !report.is_clean() {
        formatter.error(&format!(
            "{} could not be synchronized:",
            plural(report.failures.len(), "item")
        ));
        for failure in &report.failures {
            formatter.info(&format!(
                "[{}] {}: {}",
                failure.drive, failure.path, failure.error
            ));
        }
    }
}
