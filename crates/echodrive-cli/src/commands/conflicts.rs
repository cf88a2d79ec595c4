//! Conflicts command - Inspect and sweep conflict copies
//!
//! Provides the `echodrive conflicts` CLI command which:
//! 1. Lists open conflict records in a table format
//! 2. Runs the resolution sweep, closing conflicts whose copy was removed

use anyhow::{Context, Result};
use clap::Subcommand;
use echodrive_core::domain::Conflict;
use echodrive_core::ports::IStateRepository;
use tracing::info;

use super::{build_engine, open_state, CommandContext};
use crate::output::{plural, truncate};

#[derive(Debug, Subcommand)]
pub enum ConflictsCommand {
    /// List open conflicts
    List,
    /// Close every conflict whose copy has been removed
    Resolve,
}

impl ConflictsCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        match self {
            ConflictsCommand::List => self.execute_list(ctx).await,
            ConflictsCommand::Resolve => self.execute_resolve(ctx).await,
        }
    }

    async fn execute_list(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;
        let state = open_state(&config).await?;

        let conflicts = state
            .list_conflicts()
            .await
            .context("Failed to query conflicts")?;
        info!(count = conflicts.len(), "Retrieved open conflicts");

        if ctx.is_json() {
            let json = serde_json::json!({
                "count": conflicts.len(),
                "conflicts": conflicts,
            });
            formatter.print_json(&json);
            return Ok(());
        }

        if conflicts.is_empty() {
            formatter.success("No open conflicts");
            return Ok(());
        }

        formatter.success(&format!("{} open", plural(conflicts.len(), "conflict")));
        formatter.info("");
        let rows: Vec<Vec<String>> = conflicts.iter().map(table_row).collect();
        formatter.table(&["Drive", "Detected", "Original", "Copy"], &rows);
        formatter.info("");
        formatter.info("Delete a copy once reviewed, then run 'echodrive conflicts resolve'.");
        Ok(())
    }

    async fn execute_resolve(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;

        let engine = match build_engine(&config, config.sync.mode).await {
            Ok(engine) => engine,
            Err(e) => {
                formatter.error(&format!("{e:#}"));
                return Ok(());
            }
        };
        let report = engine.resolve_conflicts().await?;

        if ctx.is_json() {
            formatter.print_json(&serde_json::json!({
                "resolved": report.conflicts_resolved,
                "failures": report.failures,
            }));
            return Ok(());
        }

        if report.conflicts_resolved == 0 {
            formatter.success("No conflicts ready to close");
        } else {
            formatter.success(&format!(
                "Closed {}",
                plural(report.conflicts_resolved, "conflict")
            ));
        }
        for failure in &report.failures {
            formatter.warn(&format!("{} on {}: {}", failure.path, failure.drive, failure.error));
        }
        Ok(())
    }
}

fn table_row(conflict: &Conflict) -> Vec<String> {
    vec![
        truncate(&conflict.drive, 16),
        conflict.detected_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        conflict.original_path.to_string(),
        conflict
            .conflict_path
            .file_name()
            .unwrap_or(conflict.conflict_path.as_str())
            .to_string(),
    ]
}
