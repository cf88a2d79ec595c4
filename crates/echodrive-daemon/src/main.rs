//! EchoDrive Daemon - Continuous two-drive synchronization
//!
//! This binary runs as a user service and handles:
//! - Watching the primary drive for changes
//! - Periodic passes that also pick up changes on the secondary drive
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon builds both drives from the configuration, starts a
//! `ChangeWatcher` on the primary root and hands its notification channel to
//! the `SyncEngine` loop. A `CancellationToken` triggered by SIGTERM or SIGINT
//! stops the engine first and the watcher second.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use echodrive_cache::{DatabasePool, SqliteStateRepository};
use echodrive_core::config::{expand_tilde, Config};
use echodrive_crypto::Cryptonizer;
use echodrive_sync::{drive_from_config, ChangeWatcher, SyncEngine, SyncEvent, SyncOptions};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable naming an alternate config file
const CONFIG_ENV: &str = "ECHODRIVE_CONFIG";

/// Notification batches buffered between the watcher and the engine
const NOTIFICATION_BUFFER: usize = 16;

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the configuration, state store and shutdown token of the daemon
struct DaemonService {
    config: Config,
    state_repo: Arc<SqliteStateRepository>,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the state store named in `config`
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            bail!("Invalid configuration: {}", messages.join("; "));
        }

        let db_path = expand_tilde(&config.state.database);
        let db_pool = DatabasePool::new(&db_path)
            .await
            .context("Failed to open state store")?;
        info!(database = %db_path.display(), "State store opened");
        let state_repo = Arc::new(SqliteStateRepository::new(db_pool.pool().clone()));

        Ok(Self {
            config,
            state_repo,
            shutdown,
        })
    }

    /// Builds the engine from the configured drives
    fn build_engine(&self) -> Result<Arc<SyncEngine>> {
        let crypto = if self.config.uses_encryption() {
            let key_file = expand_tilde(&self.config.encryption.key_file);
            let crypto = Cryptonizer::load_key_file(&key_file)
                .with_context(|| format!("Failed to load key from {}", key_file.display()))?;
            Some(Arc::new(crypto))
        } else {
            None
        };

        let page_size = self.config.sync.page_size;
        let primary = drive_from_config(&self.config.primary, page_size, crypto.as_ref())?;
        let secondary = drive_from_config(&self.config.secondary, page_size, crypto.as_ref())?;

        Ok(Arc::new(SyncEngine::new(
            primary,
            secondary,
            self.state_repo.clone(),
            SyncOptions::from(&self.config.sync),
        )))
    }

    /// Runs until the shutdown token is cancelled
    async fn run(&self) -> Result<()> {
        let engine = self.build_engine()?;

        let primary_root = expand_tilde(&self.config.primary.root);
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let watcher = ChangeWatcher::start(
            &primary_root,
            Duration::from_millis(self.config.sync.quiet_interval_ms),
            tx,
        )?;

        let events = tokio::spawn(log_events(engine.subscribe(), self.shutdown.clone()));
        let scheduler = engine.start(rx);

        info!(
            mode = %engine.options().mode,
            primary = %self.config.primary.name,
            secondary = %self.config.secondary.name,
            "Daemon running"
        );

        self.shutdown.cancelled().await;

        info!("Stopping sync engine");
        engine.stop();
        if let Err(e) = scheduler.await {
            error!(error = %e, "Sync loop ended abnormally");
        }
        watcher.stop().await;
        let _ = events.await;

        Ok(())
    }
}

/// Surfaces conflicts and failures published by the engine
async fn log_events(mut events: broadcast::Receiver<SyncEvent>, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(SyncEvent::ConflictCreated {
                drive,
                original,
                conflict,
            }) => warn!(%drive, %original, %conflict, "Conflict copy created"),
            Ok(SyncEvent::ItemFailed { drive, path, error }) => {
                warn!(%drive, %path, %error, "Item failed to synchronize")
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event log lagging behind the engine")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path)
}

fn init_tracing(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path();
    let config = Config::load_or_default(&config_path);
    init_tracing(&config);

    info!(config_path = %config_path.display(), "EchoDrive daemon starting (echodrived)");

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token.clone()).await?;

    let result = service.run().await;

    match &result {
        Ok(()) => info!("EchoDrive daemon shut down gracefully"),
        Err(e) => error!(error = %e, "EchoDrive daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
