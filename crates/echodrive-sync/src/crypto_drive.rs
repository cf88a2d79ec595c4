//! Encrypting drive decorator
//!
//! [`CryptoDrive`] wraps any [`IDriveProxy`] so that file content is encrypted
//! on its way in and decrypted on its way out. Listing, metadata, moves and
//! deletes go straight to the inner drive.
//!
//! ## Design Notes
//!
//! - Sizes and content hashes reported by the wrapped drive describe the
//!   ciphertext. The engine only compares them with earlier observations of
//!   the same drive, so that is enough to detect changes.
//! - Uploads need the plaintext length up front; content of unknown length is
//!   read into memory first.

use std::io::{Cursor, Read};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use echodrive_core::domain::{ContentStream, DownloadLocator, DriveItem};
use echodrive_core::ports::{DeltaPage, DriveError, IDriveProxy};
use echodrive_crypto::{CryptoError, Cryptonizer};
use tracing::debug;

/// Drive whose stored content is AES-CBC encrypted
pub struct CryptoDrive {
    inner: Arc<dyn IDriveProxy>,
    crypto: Arc<Cryptonizer>,
}

impl CryptoDrive {
    pub fn new(inner: Arc<dyn IDriveProxy>, crypto: Arc<Cryptonizer>) -> Self {
        Self { inner, crypto }
    }
}

fn crypto_error(err: CryptoError) -> DriveError {
    match err {
        CryptoError::Io(e) => DriveError::io("<content stream>", e),
        other => DriveError::Other(other.into()),
    }
}

fn join_error(e: tokio::task::JoinError) -> DriveError {
    DriveError::Other(anyhow::anyhow!("Blocking task failed: {e}"))
}

/// Wrap `content` in an encrypting stream, buffering it if its length is unknown
fn encrypt_content(crypto: &Cryptonizer, content: ContentStream) -> Result<ContentStream, CryptoError> {
    let (reader, length): (Box<dyn Read + Send>, u64) = match content.into_parts() {
        (reader, Some(length)) => (reader, length),
        (mut reader, None) => {
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer)?;
            let length = buffer.len() as u64;
            (Box::new(Cursor::new(buffer)), length)
        }
    };

    let stream = crypto.encrypt_stream(reader, length)?;
    let encrypted_len = stream.len();
    Ok(ContentStream::new(stream, Some(encrypted_len)))
}

#[async_trait::async_trait]
impl IDriveProxy for CryptoDrive {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_local(&self) -> bool {
        self.inner.is_local()
    }

    async fn delta_page(&self, cursor: Option<&str>) -> Result<DeltaPage, DriveError> {
        self.inner.delta_page(cursor).await
    }

    async fn create_or_update(
        &self,
        item: &DriveItem,
        content: Option<ContentStream>,
    ) -> Result<DriveItem, DriveError> {
        let content = match content {
            Some(content) if item.is_file() => {
                let crypto = Arc::clone(&self.crypto);
                let encrypted = tokio::task::spawn_blocking(move || encrypt_content(&crypto, content))
                    .await
                    .map_err(join_error)?
                    .map_err(crypto_error)?;
                debug!(path = %item.path, length = ?encrypted.length(), "Encrypting upload");
                Some(encrypted)
            }
            other => other,
        };
        self.inner.create_or_update(item, content).await
    }

    async fn move_item(&self, old: &DriveItem, new: &DriveItem) -> Result<DriveItem, DriveError> {
        self.inner.move_item(old, new).await
    }

    async fn delete(&self, item: &DriveItem) -> Result<(), DriveError> {
        self.inner.delete(item).await
    }

    async fn exists(&self, item: &DriveItem) -> Result<bool, DriveError> {
        self.inner.exists(item).await
    }

    async fn get_item(&self, item: &DriveItem) -> Result<Option<DriveItem>, DriveError> {
        self.inner.get_item(item).await
    }

    async fn get_last_write_time_utc(&self, item: &DriveItem) -> Result<DateTime<Utc>, DriveError> {
        self.inner.get_last_write_time_utc(item).await
    }

    async fn get_content_hash(&self, item: &DriveItem) -> Result<String, DriveError> {
        self.inner.get_content_hash(item).await
    }

    async fn get_download_locator(&self, item: &DriveItem) -> Result<DownloadLocator, DriveError> {
        self.inner.get_download_locator(item).await
    }

    async fn open_content(&self, locator: &DownloadLocator) -> Result<ContentStream, DriveError> {
        let ciphertext = self.inner.open_content(locator).await?;
        let crypto = Arc::clone(&self.crypto);

        // Reading the IV prefix blocks on the inner reader
        let plaintext = tokio::task::spawn_blocking(move || crypto.decrypt_stream(ciphertext))
            .await
            .map_err(join_error)?
            .map_err(crypto_error)?;
        Ok(ContentStream::new(plaintext, None))
    }
}
