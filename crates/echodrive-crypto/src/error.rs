//! Error types for the crypto crate

use std::path::PathBuf;

/// Errors raised while handling keys or setting up streams
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key material is not 16, 24 or 32 bytes long
    #[error("Invalid key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    /// Requested key size is not 128, 192 or 256 bits
    #[error("Unsupported key size: {0} bits")]
    UnsupportedKeySize(u32),

    /// Key file content is not valid base64
    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// Reading or writing a key file failed
    #[error("Key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The encrypted input ended before the IV prefix was complete
    #[error("Ciphertext too short: missing IV prefix")]
    MissingIv,

    /// Padding check failed while decrypting
    #[error("Invalid padding")]
    InvalidPadding,

    /// Ciphertext is not a whole number of blocks
    #[error("Ciphertext truncated")]
    Truncated,

    /// Plaintext produced a different number of bytes than declared
    #[error("Plaintext length mismatch: declared {declared}, read {actual}")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for std::io::Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Io(inner) => inner,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
