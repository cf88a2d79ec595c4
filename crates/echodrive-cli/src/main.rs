//! EchoDrive CLI - Command-line interface for EchoDrive
//!
//! Provides commands for:
//! - Running a one-shot synchronization pass
//! - Listing and sweeping conflict copies
//! - Generating content keys and restoring encrypted files
//! - Showing and validating configuration

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use echodrive_core::config::Config;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    config::ConfigCommand, conflicts::ConflictsCommand, keygen::KeygenCommand,
    restore::RestoreCommand, sync::SyncCommand, CommandContext, CommandFailed,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "echodrive", version, about = "Two-drive file synchronization with encrypted mirrors")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one synchronization pass
    Sync(SyncCommand),
    /// Inspect and sweep conflict copies
    #[command(subcommand)]
    Conflicts(ConflictsCommand),
    /// Generate a content encryption key
    Keygen(KeygenCommand),
    /// Decrypt a file from an encrypted drive
    Restore(RestoreCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so JSON output on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = CommandContext {
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
        quiet: cli.quiet,
        config_path: cli.config.unwrap_or_else(Config::default_path),
    };

    let result = match cli.command {
        Commands::Sync(cmd) => cmd.execute(&ctx).await,
        Commands::Conflicts(cmd) => cmd.execute(&ctx).await,
        Commands::Keygen(cmd) => cmd.execute(&ctx).await,
        Commands::Restore(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.downcast_ref::<CommandFailed>().is_some() => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}
