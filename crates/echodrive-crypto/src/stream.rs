//! Streaming AES-CBC-PKCS7 adapters
//!
//! [`EncryptStream`] emits the raw IV followed by the ciphertext and knows its
//! total length before the first read. [`DecryptStream`] consumes that layout
//! and yields the plaintext, holding back the final block until the end of
//! input so that the padding can be checked and stripped.

use std::io::{self, Read, Seek, SeekFrom};

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// IV length, equal to the AES block size
pub const IV_LEN: usize = 16;

/// Plaintext bytes pulled from the inner reader per refill
const CHUNK_LEN: usize = 64 * IV_LEN;

/// Exact size of the encrypted layout for a plaintext of `plain_len` bytes.
///
/// PKCS7 always appends between 1 and 16 bytes, so the ciphertext is the next
/// block multiple strictly above the plaintext length.
#[must_use]
pub fn encrypted_len(plain_len: u64) -> u64 {
    let block = IV_LEN as u64;
    block + (plain_len / block + 1) * block
}

// ============================================================================
// Cipher selection
// ============================================================================

enum CbcEncryptor {
    Aes128(cbc::Encryptor<Aes128>),
    Aes192(cbc::Encryptor<Aes192>),
    Aes256(cbc::Encryptor<Aes256>),
}

impl CbcEncryptor {
    fn new(key: &[u8], iv: &[u8; IV_LEN]) -> Result<Self, CryptoError> {
        let invalid = |_| CryptoError::InvalidKeyLength(key.len());
        Ok(match key.len() {
            16 => Self::Aes128(cbc::Encryptor::new_from_slices(key, iv).map_err(invalid)?),
            24 => Self::Aes192(cbc::Encryptor::new_from_slices(key, iv).map_err(invalid)?),
            32 => Self::Aes256(cbc::Encryptor::new_from_slices(key, iv).map_err(invalid)?),
            other => return Err(CryptoError::InvalidKeyLength(other)),
        })
    }

    /// Encrypt whole blocks in place
    fn encrypt_blocks(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(IV_LEN) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                Self::Aes128(c) => c.encrypt_block_mut(block),
                Self::Aes192(c) => c.encrypt_block_mut(block),
                Self::Aes256(c) => c.encrypt_block_mut(block),
            }
        }
    }
}

enum CbcDecryptor {
    Aes128(cbc::Decryptor<Aes128>),
    Aes192(cbc::Decryptor<Aes192>),
    Aes256(cbc::Decryptor<Aes256>),
}

impl CbcDecryptor {
    fn new(key: &[u8], iv: &[u8; IV_LEN]) -> Result<Self, CryptoError> {
        let invalid = |_| CryptoError::InvalidKeyLength(key.len());
        Ok(match key.len() {
            16 => Self::Aes128(cbc::Decryptor::new_from_slices(key, iv).map_err(invalid)?),
            24 => Self::Aes192(cbc::Decryptor::new_from_slices(key, iv).map_err(invalid)?),
            32 => Self::Aes256(cbc::Decryptor::new_from_slices(key, iv).map_err(invalid)?),
            other => return Err(CryptoError::InvalidKeyLength(other)),
        })
    }

    fn decrypt_blocks(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(IV_LEN) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                Self::Aes128(c) => c.decrypt_block_mut(block),
                Self::Aes192(c) => c.decrypt_block_mut(block),
                Self::Aes256(c) => c.decrypt_block_mut(block),
            }
        }
    }
}

/// Read into `buf` until it is full or the reader is exhausted
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ============================================================================
// EncryptStream
// ============================================================================

/// Reader producing `[IV][ciphertext]` for a plaintext of declared length
pub struct EncryptStream<R> {
    inner: R,
    key: Zeroizing<Vec<u8>>,
    iv: [u8; IV_LEN],
    cipher: CbcEncryptor,
    plain_len: u64,
    consumed: u64,
    /// Encrypted bytes not yet handed out
    out: Vec<u8>,
    out_pos: usize,
    /// Bytes handed out so far
    position: u64,
    header_sent: bool,
    finished: bool,
}

impl<R: Read> EncryptStream<R> {
    pub(crate) fn new(
        inner: R,
        plain_len: u64,
        key: &[u8],
        iv: [u8; IV_LEN],
    ) -> Result<Self, CryptoError> {
        let cipher = CbcEncryptor::new(key, &iv)?;
        Ok(Self {
            inner,
            key: Zeroizing::new(key.to_vec()),
            iv,
            cipher,
            plain_len,
            consumed: 0,
            out: Vec::with_capacity(CHUNK_LEN + IV_LEN),
            out_pos: 0,
            position: 0,
            header_sent: false,
            finished: false,
        })
    }

    /// Total number of bytes this stream produces
    #[must_use]
    pub fn len(&self) -> u64 {
        encrypted_len(self.plain_len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// IV written at the head of the stream
    #[must_use]
    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Produce the next run of output into `self.out`
    fn refill(&mut self) -> io::Result<()> {
        self.out.clear();
        self.out_pos = 0;

        if !self.header_sent {
            self.out.extend_from_slice(&self.iv);
            self.header_sent = true;
            return Ok(());
        }

        let mut chunk = vec![0u8; CHUNK_LEN];
        let read = fill(&mut self.inner, &mut chunk)?;
        self.consumed += read as u64;

        if self.consumed > self.plain_len {
            return Err(CryptoError::LengthMismatch {
                declared: self.plain_len,
                actual: self.consumed,
            }
            .into());
        }

        chunk.truncate(read);

        if read == CHUNK_LEN {
            // A full chunk is block aligned; more input may follow.
            self.cipher.encrypt_blocks(&mut chunk);
            self.out.extend_from_slice(&chunk);
            return Ok(());
        }

        if self.consumed != self.plain_len {
            return Err(CryptoError::LengthMismatch {
                declared: self.plain_len,
                actual: self.consumed,
            }
            .into());
        }

        let pad = IV_LEN - (chunk.len() % IV_LEN);
        chunk.resize(chunk.len() + pad, pad as u8);
        self.cipher.encrypt_blocks(&mut chunk);
        self.out.extend_from_slice(&chunk);
        self.finished = true;
        Ok(())
    }
}

impl<R: Read> Read for EncryptStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.out_pos >= self.out.len() {
            if self.finished {
                return Ok(0);
            }
            self.refill()?;
        }

        let available = &self.out[self.out_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.out_pos += n;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for EncryptStream<R> {
    /// Only rewinding to the start is supported; the same IV is replayed.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Start(0) => {
                self.inner.rewind()?;
                self.cipher = CbcEncryptor::new(&self.key, &self.iv).map_err(io::Error::from)?;
                self.consumed = 0;
                self.out.clear();
                self.out_pos = 0;
                self.position = 0;
                self.header_sent = false;
                self.finished = false;
                Ok(0)
            }
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "encrypted stream can only be rewound to its start",
            )),
        }
    }
}

// ============================================================================
// DecryptStream
// ============================================================================

/// Reader producing plaintext from `[ciphertext]` whose IV was already read
pub struct DecryptStream<R> {
    inner: R,
    cipher: CbcDecryptor,
    /// Ciphertext read but not yet decrypted
    pending: Vec<u8>,
    out: Vec<u8>,
    out_pos: usize,
    blocks_seen: bool,
    finished: bool,
}

impl<R: Read> DecryptStream<R> {
    pub(crate) fn new(inner: R, key: &[u8], iv: [u8; IV_LEN]) -> Result<Self, CryptoError> {
        Ok(Self {
            inner,
            cipher: CbcDecryptor::new(key, &iv)?,
            pending: Vec::with_capacity(CHUNK_LEN + IV_LEN),
            out: Vec::with_capacity(CHUNK_LEN),
            out_pos: 0,
            blocks_seen: false,
            finished: false,
        })
    }

    fn refill(&mut self) -> io::Result<()> {
        self.out.clear();
        self.out_pos = 0;

        let mut chunk = vec![0u8; CHUNK_LEN];
        let read = fill(&mut self.inner, &mut chunk)?;
        self.pending.extend_from_slice(&chunk[..read]);
        let at_end = read < CHUNK_LEN;

        if !at_end {
            // Keep the trailing block back: it may carry the padding.
            let whole = self.pending.len() / IV_LEN * IV_LEN;
            let ready = if whole == self.pending.len() {
                whole - IV_LEN
            } else {
                whole
            };
            let mut blocks: Vec<u8> = self.pending.drain(..ready).collect();
            self.cipher.decrypt_blocks(&mut blocks);
            self.blocks_seen |= !blocks.is_empty();
            self.out = blocks;
            return Ok(());
        }

        if self.pending.len() % IV_LEN != 0 || (self.pending.is_empty() && !self.blocks_seen) {
            return Err(CryptoError::Truncated.into());
        }

        let mut blocks = std::mem::take(&mut self.pending);
        self.cipher.decrypt_blocks(&mut blocks);

        let pad = usize::from(*blocks.last().ok_or(CryptoError::Truncated)?);
        if pad == 0 || pad > IV_LEN || pad > blocks.len() {
            return Err(CryptoError::InvalidPadding.into());
        }
        if blocks[blocks.len() - pad..].iter().any(|&b| usize::from(b) != pad) {
            return Err(CryptoError::InvalidPadding.into());
        }
        blocks.truncate(blocks.len() - pad);

        self.out = blocks;
        self.finished = true;
        Ok(())
    }
}

impl<R: Read> Read for DecryptStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.out_pos >= self.out.len() {
            if self.finished {
                return Ok(0);
            }
            self.refill()?;
        }

        let available = &self.out[self.out_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.out_pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const KEY: [u8; 32] = [7u8; 32];
    const IV: [u8; IV_LEN] = [3u8; IV_LEN];

    fn encrypt(plain: &[u8]) -> Vec<u8> {
        let mut stream =
            EncryptStream::new(Cursor::new(plain.to_vec()), plain.len() as u64, &KEY, IV).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        out
    }

    fn decrypt(cipher: &[u8]) -> io::Result<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&cipher[..IV_LEN]);
        let mut stream = DecryptStream::new(Cursor::new(cipher[IV_LEN..].to_vec()), &KEY, iv)
            .map_err(io::Error::from)?;
        let mut out = Vec::new();
        stream.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_encrypted_len_values() {
        assert_eq!(encrypted_len(0), 32);
        assert_eq!(encrypted_len(1), 32);
        assert_eq!(encrypted_len(15), 32);
        assert_eq!(encrypted_len(16), 48);
        assert_eq!(encrypted_len(17), 48);
    }

    #[test]
    fn test_encrypted_len_matches_ceil_formula_when_unaligned() {
        for p in (0u64..200).filter(|p| p % 16 != 0) {
            let ceil = (p + 16).div_ceil(16) * 16;
            assert_eq!(encrypted_len(p), ceil, "plaintext length {p}");
        }
    }

    #[test]
    fn test_stream_starts_with_iv_and_has_exact_length() {
        for len in [0usize, 1, 15, 16, 17, CHUNK_LEN - 1, CHUNK_LEN, CHUNK_LEN + 5, 3 * CHUNK_LEN] {
            let plain = vec![0xAB; len];
            let out = encrypt(&plain);
            assert_eq!(&out[..IV_LEN], &IV);
            assert_eq!(out.len() as u64, encrypted_len(len as u64), "length {len}");
            assert_eq!(decrypt(&out).unwrap(), plain, "length {len}");
        }
    }

    #[test]
    fn test_short_plaintext_is_rejected() {
        let mut stream = EncryptStream::new(Cursor::new(vec![1u8; 10]), 20, &KEY, IV).unwrap();
        let mut out = Vec::new();
        let err = stream.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_long_plaintext_is_rejected() {
        let mut stream = EncryptStream::new(Cursor::new(vec![1u8; 40]), 20, &KEY, IV).unwrap();
        let mut out = Vec::new();
        assert!(stream.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_rewind_replays_identical_output() {
        let plain = b"rewind me please, twice over".to_vec();
        let mut stream =
            EncryptStream::new(Cursor::new(plain.clone()), plain.len() as u64, &KEY, IV).unwrap();

        let mut first = Vec::new();
        stream.read_to_end(&mut first).unwrap();
        assert_eq!(stream.stream_position().unwrap(), first.len() as u64);

        assert_eq!(stream.seek(SeekFrom::Start(0)).unwrap(), 0);
        let mut second = Vec::new();
        stream.read_to_end(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_other_seeks_are_unsupported() {
        let mut stream = EncryptStream::new(Cursor::new(vec![0u8; 4]), 4, &KEY, IV).unwrap();
        for pos in [SeekFrom::Start(3), SeekFrom::End(0), SeekFrom::Current(2)] {
            let err = stream.seek(pos).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        }
    }

    #[test]
    fn test_tampered_padding_is_rejected() {
        let mut out = encrypt(b"sixteen byte msg");
        let last = out.len() - 1;
        out[last] ^= 0xFF;
        assert!(decrypt(&out).is_err());
    }

    #[test]
    fn test_truncated_ciphertext_is_rejected() {
        let out = encrypt(b"some content here");
        assert!(decrypt(&out[..out.len() - 3]).is_err());
        assert!(decrypt(&out[..IV_LEN]).is_err());
    }

    #[test]
    fn test_aes128_and_aes192_keys() {
        for key_len in [16usize, 24] {
            let key = vec![9u8; key_len];
            let plain = b"different key sizes".to_vec();
            let mut enc =
                EncryptStream::new(Cursor::new(plain.clone()), plain.len() as u64, &key, IV)
                    .unwrap();
            let mut out = Vec::new();
            enc.read_to_end(&mut out).unwrap();

            let mut dec = DecryptStream::new(Cursor::new(out[IV_LEN..].to_vec()), &key, IV).unwrap();
            let mut back = Vec::new();
            dec.read_to_end(&mut back).unwrap();
            assert_eq!(back, plain);
        }
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            EncryptStream::new(Cursor::new(Vec::new()), 0, &[0u8; 20], IV),
            Err(CryptoError::InvalidKeyLength(20))
        ));
    }
}
