//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.
//!
//! The key hierarchy is two levels deep: a random [`VaultKey`] encrypts the
//! manifest and every blob, and is itself stored only in wrapped form under
//! a [`PasswordKey`] (Argon2id of the password) or a [`RecoveryKey`]
//! (derived from a recovery code).

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::{decrypt, encrypt};
use hiddenvault_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of the KDF salt in bytes.
pub const SALT_LENGTH: usize = 16;

/// Random key that encrypts the manifest and all blobs of one vault.
///
/// Lives only inside an unlocked session and never touches disk
/// unwrapped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; KEY_LENGTH],
}

impl VaultKey {
    /// Generate a random vault key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a vault key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Seal this key under a key-encryption key.
    ///
    /// Returns `nonce || ciphertext || tag`, suitable for a header key slot.
    pub fn wrap(&self, kek: &[u8; KEY_LENGTH]) -> Result<Vec<u8>> {
        encrypt(kek, &self.key)
    }

    /// Recover a vault key from a key slot.
    ///
    /// # Errors
    /// - `AuthenticationFailed` if `kek` is wrong or the slot was modified
    /// - `Crypto` if the slot does not contain a key of the right length
    pub fn unwrap_from(kek: &[u8; KEY_LENGTH], slot: &[u8]) -> Result<Self> {
        let mut plaintext = decrypt(kek, slot)?;
        if plaintext.len() != KEY_LENGTH {
            plaintext.zeroize();
            return Err(Error::Crypto("Key slot has wrong length".to_string()));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&plaintext);
        plaintext.zeroize();
        Ok(Self { key })
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultKey([REDACTED])")
    }
}

/// Key-encryption key derived from the user's password.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PasswordKey {
    key: [u8; KEY_LENGTH],
}

impl PasswordKey {
    /// Create a password key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for PasswordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PasswordKey([REDACTED])")
    }
}

/// Key-encryption key derived from a recovery code.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RecoveryKey {
    key: [u8; KEY_LENGTH],
}

impl RecoveryKey {
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for RecoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecoveryKey([REDACTED])")
    }
}

/// Salt for key derivation. Stored in the plaintext header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}
