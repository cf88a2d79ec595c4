//! Restore command - Decrypt a file taken from an encrypted drive
//!
//! Reads `<encrypted>`, decrypts it with the configured content key and
//! writes the plaintext to `<output>`. The output only appears once the
//! whole file has been decrypted and its padding verified.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use echodrive_core::config::expand_tilde;
use echodrive_crypto::Cryptonizer;
use tracing::info;

use super::{reported, CommandContext};

#[derive(Debug, Args)]
pub struct RestoreCommand {
    /// Encrypted file as stored on the drive
    pub encrypted: PathBuf,

    /// Where to write the decrypted file
    pub output: PathBuf,

    /// Key file to use instead of the configured one
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Replace an existing output file
    #[arg(long)]
    pub force: bool,
}

impl RestoreCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;

        let key_file = self
            .key_file
            .clone()
            .unwrap_or_else(|| expand_tilde(&config.encryption.key_file));
        let crypto = Cryptonizer::load_key_file(&key_file)
            .with_context(|| format!("Failed to load key from {}", key_file.display()))?;

        let (input, output, force) = (self.encrypted.clone(), self.output.clone(), self.force);
        let result =
            tokio::task::spawn_blocking(move || restore_file(&crypto, &input, &output, force))
                .await
                .context("Restore task failed")?;

        match result {
            Ok(bytes) => {
                info!(output = %self.output.display(), bytes, "File restored");
                if ctx.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "success": true,
                        "output": self.output.display().to_string(),
                        "bytes": bytes,
                    }));
                } else {
                    formatter.success(&format!(
                        "Restored {} ({} bytes)",
                        self.output.display(),
                        bytes
                    ));
                }
            }
            Err(e) => return Err(reported(&*formatter, e)),
        }
        Ok(())
    }
}

/// Decrypt `input` into `output`, returning the plaintext length
fn restore_file(crypto: &Cryptonizer, input: &Path, output: &Path, force: bool) -> Result<u64> {
    if output.exists() && !force {
        bail!(
            "{} already exists; use --force to replace it",
            output.display()
        );
    }

    let file = File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let mut plaintext = crypto
        .decrypt_stream(BufReader::new(file))
        .with_context(|| format!("{} is not an encrypted file", input.display()))?;

    let partial = output.with_extension("restore-partial");
    let written = (|| -> Result<u64> {
        let mut out = File::create(&partial)
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        let written = io::copy(&mut plaintext, &mut out).context("Decryption failed")?;
        out.sync_all()?;
        fs::rename(&partial, output)
            .with_context(|| format!("Failed to move output into {}", output.display()))?;
        Ok(written)
    })();

    if written.is_err() {
        let _ = fs::remove_file(&partial);
    }
    written
}
