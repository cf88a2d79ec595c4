//! EchoDrive Crypto - content encryption in transit and at rest
//!
//! Wraps plaintext readers in AES-CBC-PKCS7 encrypting streams whose total
//! length is known before the first byte is produced, and unwraps them again.
//!
//! ## Encrypted layout
//!
//! ```text
//! [ IV (16 bytes) ][ AES-CBC ciphertext, PKCS7 padded ]
//! ```
//!
//! There is no magic number, version byte or length field; the plaintext
//! length follows from the stream length and the padding.
//!
//! ## Key Components
//!
//! - [`Cryptonizer`] - keyed, stateful entry point; serializes its own calls
//! - [`EncryptStream`] / [`DecryptStream`] - the `Read` adapters
//! - [`CryptoError`] - error type for key handling and stream setup

pub mod cryptonizer;
pub mod error;
pub mod stream;

pub use cryptonizer::Cryptonizer;
pub use error::CryptoError;
pub use stream::{encrypted_len, DecryptStream, EncryptStream, IV_LEN};
