//! Config command - View and manage EchoDrive configuration
//!
//! Provides the `echodrive config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Sets individual values via dot-notation keys
//! 3. Validates the configuration file and reports errors

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use echodrive_core::config::Config;
use echodrive_core::domain::SyncMode;
use tracing::info;

use super::CommandContext;

/// Keys accepted by `config set`, with a short description each
const SETTABLE_KEYS: &[(&str, &str)] = &[
    ("sync.mode", "two_way|echo"),
    ("sync.poll_interval", "Seconds between polling passes"),
    ("sync.quiet_interval_ms", "Quiet period before a change batch is delivered"),
    ("sync.max_concurrent_transfers", "Parallel file copies per page"),
    ("sync.page_size", "Items per listing page"),
    ("primary.name", "Primary drive name"),
    ("primary.root", "Primary drive directory"),
    ("primary.encrypted", "true|false"),
    ("secondary.name", "Secondary drive name"),
    ("secondary.root", "Secondary drive directory"),
    ("secondary.encrypted", "true|false"),
    ("encryption.key_file", "Content key file"),
    ("encryption.key_bits", "128|192|256"),
    ("state.database", "SQLite state store"),
    ("logging.level", "trace|debug|info|warn|error"),
    ("logging.format", "text|json"),
];

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "sync.poll_interval")
        key: String,
        /// New value
        value: String,
    },
    /// Validate configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(ctx),
            ConfigCommand::Set { key, value } => self.execute_set(ctx, key, value),
            ConfigCommand::Validate => self.execute_validate(ctx),
        }
    }

    fn execute_show(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;

        if ctx.is_json() {
            let json = serde_json::to_value(&config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            formatter.success(&format!("Configuration ({})", ctx.config_path.display()));
            formatter.info("");
            for line in config.to_yaml()?.lines() {
                formatter.info(line);
            }
        }
        Ok(())
    }

    fn execute_set(&self, ctx: &CommandContext, key: &str, value: &str) -> Result<()> {
        let formatter = ctx.formatter();
        let mut config = ctx.load_config()?;

        info!(key, value, "Setting configuration value");

        if let Err(e) = apply_config_value(&mut config, key, value) {
            if ctx.is_json() {
                formatter.print_json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "error": e.to_string(),
                }));
            } else {
                formatter.error(&format!("Failed to set '{key}': {e}"));
                formatter.info("");
                formatter.info("Supported keys:");
                for (name, help) in SETTABLE_KEYS {
                    formatter.info(&format!("  {name:<32} {help}"));
                }
            }
            return Ok(());
        }

        let errors: Vec<String> = config.validate().iter().map(ToString::to_string).collect();
        if !errors.is_empty() {
            if ctx.is_json() {
                formatter.print_json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "errors": errors,
                }));
            } else {
                formatter.error(&format!("Invalid value for '{key}': {}", errors.join("; ")));
            }
            return Ok(());
        }

        if let Some(parent) = ctx.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }
        std::fs::write(&ctx.config_path, config.to_yaml()?)
            .context("Failed to write configuration file")?;

        if ctx.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "key": key,
                "value": value,
                "config_path": ctx.config_path.display().to_string(),
            }));
        } else {
            formatter.success(&format!("Set {key} = {value}"));
            formatter.info(&format!("Saved to {}", ctx.config_path.display()));
        }
        Ok(())
    }

    fn execute_validate(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let path = ctx.config_path.display().to_string();

        if !ctx.config_path.exists() {
            if ctx.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": path,
                    "errors": ["Configuration file not found. Using defaults."],
                }));
            } else {
                formatter.info(&format!("Configuration file not found at {path}"));
                formatter.info(
                    "Using default configuration. Run 'echodrive config set <key> <value>' to create one.",
                );
            }
            return Ok(());
        }

        let config = match Config::load(&ctx.config_path) {
            Ok(config) => config,
            Err(e) => {
                if ctx.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "valid": false,
                        "config_path": path,
                        "errors": [format!("Failed to parse configuration: {e}")],
                    }));
                } else {
                    formatter.error(&format!("Failed to parse configuration: {e}"));
                    formatter.info(&format!("File: {path}"));
                }
                return Ok(());
            }
        };

        info!(config_path = %path, "Validating configuration");
        let errors = config.validate();

        if ctx.is_json() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            formatter.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": path,
                "errors": messages,
            }));
        } else if errors.is_empty() {
            formatter.success("Configuration is valid");
            formatter.info(&format!("File: {path}"));
        } else {
            formatter.error(&format!(
                "Configuration has {}:",
                crate::output::plural(errors.len(), "error")
            ));
            formatter.info(&format!("File: {path}"));
            formatter.info("");
            for error in &errors {
                formatter.info(&format!("  {} - {}", error.field, error.message));
            }
        }
        Ok(())
    }
}

/// Apply a dot-notation key/value pair to `config`
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
        value
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("Expected a positive integer for {key}"))
    }
    fn flag(key: &str, value: &str) -> Result<bool> {
        match value {
            "true" | "yes" | "on" => Ok(true),
            "false" | "no" | "off" => Ok(false),
            _ => bail!("Expected true or false for {key}"),
        }
    }

    match key {
        "sync.mode" => config.sync.mode = value.parse::<SyncMode>()?,
        "sync.poll_interval" => config.sync.poll_interval = number(key, value)?,
        "sync.quiet_interval_ms" => config.sync.quiet_interval_ms = number(key, value)?,
        "sync.max_concurrent_transfers" => {
            config.sync.max_concurrent_transfers = number(key, value)?
        }
        "sync.page_size" => config.sync.page_size = number(key, value)?,

        "primary.name" => config.primary.name = value.to_string(),
        "primary.root" => config.primary.root = PathBuf::from(value),
        "primary.encrypted" => config.primary.encrypted = flag(key, value)?,
        "secondary.name" => config.secondary.name = value.to_string(),
        "secondary.root" => config.secondary.root = PathBuf::from(value),
        "secondary.encrypted" => config.secondary.encrypted = flag(key, value)?,

        "encryption.key_file" => config.encryption.key_file = PathBuf::from(value),
        "encryption.key_bits" => config.encryption.key_bits = number(key, value)?,

        "state.database" => config.state.database = PathBuf::from(value),

        "logging.level" => config.logging.level = value.to_string(),
        "logging.format" => config.logging.format = value.to_string(),

        _ => bail!("Unknown configuration key: '{key}'"),
    }
    Ok(())
}
