//! CLI subcommands and the wiring they share

pub mod config;
pub mod conflicts;
pub mod keygen;
pub mod restore;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use echodrive_cache::{DatabasePool, SqliteStateRepository};
use echodrive_core::config::{expand_tilde, Config};
use echodrive_core::domain::SyncMode;
use echodrive_crypto::Cryptonizer;
use echodrive_sync::{drive_from_config, SyncEngine, SyncOptions};
use tracing::info;

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Marks an error the command has already shown through its formatter.
///
/// `main` maps it to a failing exit status without printing it again.
#[derive(Debug, Clone, Copy)]
pub struct CommandFailed;

impl std::fmt::Display for CommandFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("command failed")
    }
}

impl std::error::Error for CommandFailed {}

/// Show `err` through `formatter` and turn it into a [`CommandFailed`]
pub fn reported(formatter: &dyn OutputFormatter, err: anyhow::Error) -> anyhow::Error {
    formatter.error(&format!("{err:#}"));
    err.context(CommandFailed)
}

/// Global options every command receives
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub format: OutputFormat,
    pub quiet: bool,
    pub config_path: PathBuf,
}

impl CommandContext {
    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format, self.quiet)
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Load the config file, or the defaults when it does not exist
    pub fn load_config(&self) -> Result<Config> {
        if !self.config_path.exists() {
            info!(config_path = %self.config_path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }
        let config = Config::load(&self.config_path).with_context(|| {
            format!("Failed to load configuration from {}", self.config_path.display())
        })?;
        info!(config_path = %self.config_path.display(), "Loaded configuration");
        Ok(config)
    }
}

/// Open the state store named in `config`
pub async fn open_state(config: &Config) -> Result<Arc<SqliteStateRepository>> {
    let db_path = expand_tilde(&config.state.database);
    let pool = DatabasePool::new(&db_path)
        .await
        .context("Failed to open state store")?;
    Ok(Arc::new(SqliteStateRepository::new(pool.pool().clone())))
}

/// Load the content key when any drive is encrypted
pub fn load_crypto(config: &Config) -> Result<Option<Arc<Cryptonizer>>> {
    if !config.uses_encryption() {
        return Ok(None);
    }
    let key_file = expand_tilde(&config.encryption.key_file);
    let crypto = Cryptonizer::load_key_file(&key_file).with_context(|| {
        format!(
            "Failed to load key from {} (run 'echodrive keygen' first)",
            key_file.display()
        )
    })?;
    Ok(Some(Arc::new(crypto)))
}

/// Build a ready-to-run engine from `config`
pub async fn build_engine(config: &Config, mode: SyncMode) -> Result<SyncEngine> {
    let errors = config.validate();
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!("Invalid configuration: {}", messages.join("; "));
    }

    let crypto = load_crypto(config)?;
    let page_size = config.sync.page_size;
    let primary = drive_from_config(&config.primary, page_size, crypto.as_ref())?;
    let secondary = drive_from_config(&config.secondary, page_size, crypto.as_ref())?;
    let state = open_state(config).await?;

    let options = SyncOptions {
        mode,
        ..SyncOptions::from(&config.sync)
    };
    Ok(SyncEngine::new(primary, secondary, state, options))
}
