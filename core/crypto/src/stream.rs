//! Chunked blob encryption for large files.
//!
//! A blob is sealed as a sequence of chunks, each independently
//! authenticated with XChaCha20-Poly1305. The nonce of chunk `i` is the
//! entry's random 24-byte nonce with the big-endian chunk counter XORed into
//! bytes 19..23 and a last-chunk flag XORed into byte 23, so chunks cannot
//! be reordered, dropped, or truncated without failing authentication.
//!
//! Sealed layout: `[chunk_0 ciphertext || tag] ... [chunk_n ciphertext || tag]`.
//! Every chunk except the last holds exactly `chunk_size` plaintext bytes.
//! An empty plaintext is sealed as a single empty final chunk.

use crate::aead::{decrypt_with_nonce, encrypt_with_nonce, NONCE_SIZE, TAG_SIZE};
use crate::keys::VaultKey;
use hiddenvault_common::{Error, Result};

/// Default chunk size for blob encryption (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

fn chunk_nonce(base: &[u8; NONCE_SIZE], index: u32, last: bool) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    for (byte, counter) in nonce[19..23].iter_mut().zip(index.to_be_bytes()) {
        *byte ^= counter;
    }
    if last {
        nonce[23] ^= 0x01;
    }
    nonce
}

/// Total sealed size of a plaintext of `plain_len` bytes.
pub fn sealed_len(plain_len: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size as u64;
    let chunks = if plain_len == 0 {
        1
    } else {
        plain_len.div_ceil(chunk_size)
    };
    plain_len + chunks * TAG_SIZE as u64
}

/// Seals consecutive chunks of one blob.
pub struct BlobSealer<'a> {
    key: &'a VaultKey,
    nonce: [u8; NONCE_SIZE],
    aad: &'a [u8],
    next_index: u32,
    finished: bool,
}

impl<'a> BlobSealer<'a> {
    /// Create a sealer for one blob.
    ///
    /// # Preconditions
    /// - `nonce` must never have been used with `key` before
    pub fn new(key: &'a VaultKey, nonce: [u8; NONCE_SIZE], aad: &'a [u8]) -> Self {
        Self {
            key,
            nonce,
            aad,
            next_index: 0,
            finished: false,
        }
    }

    /// Seal the next chunk. `last` must be set on the final chunk only.
    ///
    /// # Errors
    /// - `Crypto` if called after the final chunk or the counter overflows
    pub fn seal_chunk(&mut self, chunk: &[u8], last: bool) -> Result<Vec<u8>> {
        if self.finished {
            return Err(Error::Crypto("Blob already finalized".to_string()));
        }
        let nonce = chunk_nonce(&self.nonce, self.next_index, last);
        let sealed = encrypt_with_nonce(self.key.as_bytes(), &nonce, self.aad, chunk)?;

        self.next_index = self
            .next_index
            .checked_add(1)
            .ok_or_else(|| Error::Crypto("Blob chunk counter overflow".to_string()))?;
        self.finished = last;
        Ok(sealed)
    }
}

/// Opens consecutive chunks of one blob.
pub struct BlobOpener<'a> {
    key: &'a VaultKey,
    nonce: [u8; NONCE_SIZE],
    aad: &'a [u8],
    next_index: u32,
}

impl<'a> BlobOpener<'a> {
    pub fn new(key: &'a VaultKey, nonce: [u8; NONCE_SIZE], aad: &'a [u8]) -> Self {
        Self {
            key,
            nonce,
            aad,
            next_index: 0,
        }
    }

    /// Authenticate and decrypt the next chunk.
    ///
    /// # Errors
    /// - `AuthenticationFailed` if the chunk was modified, reordered, or
    ///   `last` does not match how it was sealed
    pub fn open_chunk(&mut self, sealed: &[u8], last: bool) -> Result<Vec<u8>> {
        let nonce = chunk_nonce(&self.nonce, self.next_index, last);
        let plain = decrypt_with_nonce(self.key.as_bytes(), &nonce, self.aad, sealed)?;
        self.next_index = self
            .next_index
            .checked_add(1)
            .ok_or_else(|| Error::Crypto("Blob chunk counter overflow".to_string()))?;
        Ok(plain)
    }
}
