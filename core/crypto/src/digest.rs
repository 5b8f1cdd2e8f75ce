//! BLAKE2b-256 digests over stored ciphertext.
//!
//! The digest is computed over exactly the bytes written to the container,
//! so a modified blob is caught before any decryption is attempted.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;

/// Length of a digest in bytes.
pub const DIGEST_LENGTH: usize = 32;

/// A 256-bit BLAKE2b digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digest256([u8; DIGEST_LENGTH]);

impl Digest256 {
    pub fn from_bytes(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }

    /// Constant-time equality.
    pub fn ct_matches(&self, other: &Digest256) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }

    /// Digest a complete buffer.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = CiphertextHasher::new();
        hasher.update(data);
        hasher.finalize()
    }
}

impl Serialize for Digest256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Digest256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        let array: [u8; DIGEST_LENGTH] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("digest must be 32 bytes"))?;
        Ok(Self(array))
    }
}

/// Incremental hasher for streamed ciphertext.
pub struct CiphertextHasher {
    inner: Blake2b<U32>,
}

impl CiphertextHasher {
    pub fn new() -> Self {
        Self {
            inner: Blake2b::<U32>::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Digest256 {
        let result = self.inner.finalize();
        let mut out = [0u8; DIGEST_LENGTH];
        out.copy_from_slice(&result);
        Digest256(out)
    }
}

impl Default for CiphertextHasher {
    fn default() -> Self {
        Self::new()
    }
}
