//! Configuration module for EchoDrive.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::SyncMode;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for EchoDrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    /// Drive whose changes win in echo mode
    pub primary: DriveConfig,
    pub secondary: DriveConfig,
    pub encryption: EncryptionConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub mode: SyncMode,
    /// Seconds between polling passes when no change notification arrives.
    pub poll_interval: u64,
    /// Quiet interval (milliseconds) after the last filesystem event before
    /// change notifications are flushed.
    pub quiet_interval_ms: u64,
    /// Maximum file transfers running at once within one delta page.
    pub max_concurrent_transfers: usize,
    /// Items per delta page for local drives.
    pub page_size: usize,
}

/// One endpoint of the sync pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    /// Unique name; also namespaces the drive's persisted state.
    pub name: String,
    /// Root folder of the drive.
    pub root: PathBuf,
    /// Encrypt content written to this drive.
    #[serde(default)]
    pub encrypted: bool,
}

/// Content encryption settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// File holding the base64-encoded key.
    pub key_file: PathBuf,
    /// Key size in bits: 128, 192 or 256.
    pub key_bits: u32,
}

/// Persisted-state settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// SQLite database file.
    pub database: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/echodrive/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("echodrive")
            .join("config.yaml")
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("echodrive")
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
        Self {
            sync: SyncConfig::default(),
            primary: DriveConfig {
                name: "local".to_string(),
                root: home.join("EchoDrive"),
                encrypted: false,
            },
            secondary: DriveConfig {
                name: "mirror".to_string(),
                root: data_dir().join("mirror"),
                encrypted: true,
            },
            encryption: EncryptionConfig::default(),
            state: StateConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::TwoWay,
            poll_interval: 60,
            quiet_interval_ms: 1000,
            max_concurrent_transfers: 4,
            page_size: 200,
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_file: data_dir().join("content.key"),
            key_bits: 256,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            database: data_dir().join("state.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

/// Valid values for `encryption.key_bits`.
const VALID_KEY_BITS: &[u32] = &[128, 192, 256];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.poll_interval == 0 {
            errors.push(ValidationError {
                field: "sync.poll_interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.quiet_interval_ms == 0 {
            errors.push(ValidationError {
                field: "sync.quiet_interval_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.max_concurrent_transfers == 0 || self.sync.max_concurrent_transfers > 64 {
            errors.push(ValidationError {
                field: "sync.max_concurrent_transfers".into(),
                message: "must be in range 1..=64".into(),
            });
        }
        if self.sync.page_size == 0 {
            errors.push(ValidationError {
                field: "sync.page_size".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- drives ---
        for (section, drive) in [("primary", &self.primary), ("secondary", &self.secondary)] {
            if drive.name.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("{section}.name"),
                    message: "must not be empty".into(),
                });
            }
            // Tilde paths are expanded at runtime.
            let root_str = drive.root.to_string_lossy();
            if !root_str.starts_with('~') && !drive.root.exists() {
                errors.push(ValidationError {
                    field: format!("{section}.root"),
                    message: format!("directory does not exist: {}", drive.root.display()),
                });
            }
        }
        if self.primary.name == self.secondary.name {
            errors.push(ValidationError {
                field: "secondary.name".into(),
                message: format!("must differ from primary.name ('{}')", self.primary.name),
            });
        }
        if self.primary.root == self.secondary.root {
            errors.push(ValidationError {
                field: "secondary.root".into(),
                message: "must differ from primary.root".into(),
            });
        }

        // --- encryption ---
        if !VALID_KEY_BITS.contains(&self.encryption.key_bits) {
            errors.push(ValidationError {
                field: "encryption.key_bits".into(),
                message: format!(
                    "invalid key size {}; valid options: 128, 192, 256",
                    self.encryption.key_bits
                ),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }

    /// Whether any drive stores encrypted content.
    pub fn uses_encryption(&self) -> bool {
        self.primary.encrypted || self.secondary.encrypted
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(raw) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(stripped) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    path.to_path_buf()
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use echodrive_core::config::ConfigBuilder;
/// use echodrive_core::domain::SyncMode;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .primary_root(PathBuf::from("/home/user/EchoDrive"))
///     .secondary_root(PathBuf::from("/mnt/backup/echo"))
///     .sync_mode(SyncMode::Echo)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.config.sync.mode = mode;
        self
    }

    pub fn sync_poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval = seconds;
        self
    }

    pub fn sync_quiet_interval_ms(mut self, millis: u64) -> Self {
        self.config.sync.quiet_interval_ms = millis;
        self
    }

    pub fn sync_max_concurrent_transfers(mut self, n: usize) -> Self {
        self.config.sync.max_concurrent_transfers = n;
        self
    }

    pub fn sync_page_size(mut self, n: usize) -> Self {
        self.config.sync.page_size = n;
        self
    }

    // --- drives ---

    pub fn primary_name(mut self, name: impl Into<String>) -> Self {
        self.config.primary.name = name.into();
        self
    }

    pub fn primary_root(mut self, root: PathBuf) -> Self {
        self.config.primary.root = root;
        self
    }

    pub fn secondary_name(mut self, name: impl Into<String>) -> Self {
        self.config.secondary.name = name.into();
        self
    }

    pub fn secondary_root(mut self, root: PathBuf) -> Self {
        self.config.secondary.root = root;
        self
    }

    pub fn secondary_encrypted(mut self, encrypted: bool) -> Self {
        self.config.secondary.encrypted = encrypted;
        self
    }

    // --- encryption ---

    pub fn encryption_key_file(mut self, path: PathBuf) -> Self {
        self.config.encryption.key_file = path;
        self
    }

    pub fn encryption_key_bits(mut self, bits: u32) -> Self {
        self.config.encryption.key_bits = bits;
        self
    }

    // --- state ---

    pub fn state_database(mut self, path: PathBuf) -> Self {
        self.config.state.database = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
