//! Keyed entry point for content encryption
//!
//! A [`Cryptonizer`] owns one AES key and the IV of its most recent stream.
//! Every call goes through the same mutex, so concurrent encrypt and decrypt
//! calls on one instance run one after another; separate instances share
//! nothing.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::stream::{DecryptStream, EncryptStream, IV_LEN};

/// Default key size in bits
pub const DEFAULT_KEY_BITS: u32 = 256;

/// AES-CBC-PKCS7 content encryptor/decryptor
pub struct Cryptonizer {
    key: Zeroizing<Vec<u8>>,
    current_iv: Mutex<[u8; IV_LEN]>,
}

impl std::fmt::Debug for Cryptonizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cryptonizer")
            .field("key_bits", &self.key_bits())
            .finish_non_exhaustive()
    }
}

impl Cryptonizer {
    /// Create from raw key material.
    ///
    /// # Errors
    /// `CryptoError::InvalidKeyLength` unless the key is 16, 24 or 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
            current_iv: Mutex::new([0u8; IV_LEN]),
        })
    }

    /// Create with a fresh random key of `key_bits` bits.
    ///
    /// # Errors
    /// `CryptoError::UnsupportedKeySize` unless `key_bits` is 128, 192 or 256.
    pub fn generate(key_bits: u32) -> Result<Self, CryptoError> {
        if !matches!(key_bits, 128 | 192 | 256) {
            return Err(CryptoError::UnsupportedKeySize(key_bits));
        }
        let mut key = Zeroizing::new(vec![0u8; (key_bits / 8) as usize]);
        OsRng.fill_bytes(&mut key);
        Self::new(&key)
    }

    #[must_use]
    pub fn key_bits(&self) -> u32 {
        (self.key.len() * 8) as u32
    }

    /// IV used by the most recent encrypt or decrypt call
    #[must_use]
    pub fn current_iv(&self) -> [u8; IV_LEN] {
        *self.lock_iv()
    }

    fn lock_iv(&self) -> MutexGuard<'_, [u8; IV_LEN]> {
        self.current_iv.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------------

    /// Wrap `plaintext` of exactly `plain_len` bytes in an encrypting stream.
    ///
    /// A fresh random IV is drawn for every call and becomes the first
    /// `IV_LEN` bytes of the output.
    pub fn encrypt_stream<R: Read>(
        &self,
        plaintext: R,
        plain_len: u64,
    ) -> Result<EncryptStream<R>, CryptoError> {
        let mut iv_guard = self.lock_iv();
        OsRng.fill_bytes(&mut *iv_guard);
        let iv = *iv_guard;
        let stream = EncryptStream::new(plaintext, plain_len, &self.key, iv)?;
        debug!(plain_len, encrypted_len = stream.len(), "Created encrypt stream");
        Ok(stream)
    }

    /// Read the IV prefix from `ciphertext` and return a decrypting stream
    /// over the rest.
    ///
    /// # Errors
    /// `CryptoError::MissingIv` if the input ends inside the IV prefix.
    pub fn decrypt_stream<R: Read>(&self, mut ciphertext: R) -> Result<DecryptStream<R>, CryptoError> {
        let mut iv_guard = self.lock_iv();
        let mut iv = [0u8; IV_LEN];
        ciphertext.read_exact(&mut iv).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => CryptoError::MissingIv,
            _ => CryptoError::Io(e),
        })?;
        *iv_guard = iv;
        DecryptStream::new(ciphertext, &self.key, iv)
    }

    // ------------------------------------------------------------------------
    // Buffer helpers
    // ------------------------------------------------------------------------

    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut stream = self.encrypt_stream(plaintext, plaintext.len() as u64)?;
        let mut out = Vec::with_capacity(stream.len() as usize);
        stream.read_to_end(&mut out)?;
        Ok(out)
    }

    pub fn decrypt_bytes(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut stream = self.decrypt_stream(ciphertext)?;
        let mut out = Vec::with_capacity(ciphertext.len());
        stream.read_to_end(&mut out).map_err(|e| {
            let kind = e.kind();
            match e.into_inner().map(|inner| inner.downcast::<CryptoError>()) {
                Some(Ok(crypto)) => *crypto,
                Some(Err(other)) => CryptoError::Io(std::io::Error::new(kind, other)),
                None => CryptoError::Io(std::io::Error::from(kind)),
            }
        })?;
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // Key files
    // ------------------------------------------------------------------------

    /// Load a key stored as base64 text.
    pub fn load_key_file(path: &Path) -> Result<Self, CryptoError> {
        let text = Zeroizing::new(fs::read_to_string(path).map_err(|source| {
            CryptoError::KeyFile {
                path: path.to_path_buf(),
                source,
            }
        })?);
        let key = Zeroizing::new(
            STANDARD
                .decode(text.trim())
                .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?,
        );
        Self::new(&key)
    }

    /// Store the key as base64 text, readable by the owner only.
    pub fn save_key_file(&self, path: &Path) -> Result<(), CryptoError> {
        let key_file_err = |source| CryptoError::KeyFile {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(key_file_err)?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let encoded = Zeroizing::new(STANDARD.encode(&*self.key));
        let mut file = options.open(path).map_err(key_file_err)?;
        file.write_all(encoded.as_bytes()).map_err(key_file_err)?;
        file.write_all(b"\n").map_err(key_file_err)?;
        file.sync_all().map_err(key_file_err)?;
        Ok(())
    }
}
