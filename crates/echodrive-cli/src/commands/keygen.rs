//! Keygen command - Generate a content encryption key
//!
//! Writes a fresh random key to the configured key file (or `--output`).
//! An existing key is never replaced without `--force`: content encrypted
//! with it could not be read any more.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use echodrive_core::config::expand_tilde;
use echodrive_crypto::Cryptonizer;
use tracing::info;

use super::{reported, CommandContext};

#[derive(Debug, Args)]
pub struct KeygenCommand {
    /// Key size in bits: 128, 192 or 256 (default from config)
    #[arg(long)]
    pub bits: Option<u32>,

    /// Write the key here instead of the configured key file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Replace an existing key file
    #[arg(long)]
    pub force: bool,
}

impl KeygenCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;

        let bits = self.bits.unwrap_or(config.encryption.key_bits);
        let path = self
            .output
            .clone()
            .unwrap_or_else(|| expand_tilde(&config.encryption.key_file));

        match write_key(&path, bits, self.force) {
            Ok(()) => {
                info!(path = %path.display(), bits, "Content key generated");
                if ctx.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "success": true,
                        "key_file": path.display().to_string(),
                        "bits": bits,
                    }));
                } else {
                    formatter.success(&format!("Generated {bits}-bit key"));
                    formatter.info(&format!("Key file: {}", path.display()));
                    formatter.info("Keep a copy somewhere safe; encrypted content cannot be recovered without it.");
                }
            }
            Err(e) => return Err(reported(&*formatter, e)),
        }
        Ok(())
    }
}

/// Generate a key of `bits` and save it at `path`
fn write_key(path: &Path, bits: u32, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Key file {} already exists; use --force to replace it",
            path.display()
        );
    }
    let crypto = Cryptonizer::generate(bits).context("Failed to generate key")?;
    crypto
        .save_key_file(path)
        .with_context(|| format!("Failed to write key file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_write_key_creates_loadable_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys").join("content.key");

        write_key(&path, 192, false).unwrap();
        let loaded = Cryptonizer::load_key_file(&path).unwrap();
        assert_eq!(loaded.key_bits(), 192);
    }

    #[test]
    fn test_write_key_refuses_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.key");
        write_key(&path, 256, false).unwrap();
        let original = std::fs::read(&path).unwrap();

        assert!(write_key(&path, 256, false).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), original);

        write_key(&path, 256, true).unwrap();
        assert_ne!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn test_write_key_rejects_bad_size() {
        let dir = TempDir::new().unwrap();
        assert!(write_key(&dir.path().join("k"), 100, false).is_err());
    }
}
