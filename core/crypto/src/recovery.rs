//! Recovery codes.
//!
//! A recovery code is 16 bytes of entropy rendered as a 12-word BIP-39
//! phrase. Codes are never stored: they are derived from the vault key, the
//! salt, a generation counter, and the code's index, so the holder of an
//! unlocked vault can recompute them and a change of salt or generation
//! invalidates every previous code.
//!
//! Each code also yields a [`RecoveryKey`] under which the vault key is
//! wrapped in a header slot. That slot is what actually lets a code decrypt
//! the vault after the password is lost.

use bip39::Mnemonic;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::{RecoveryKey, Salt, VaultKey, KEY_LENGTH};
use hiddenvault_common::{Error, Result};

/// Entropy bytes per code (128 bits, 12 words).
pub const RECOVERY_ENTROPY_LEN: usize = 16;

/// One recovery code.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RecoveryCode {
    entropy: [u8; RECOVERY_ENTROPY_LEN],
}

impl RecoveryCode {
    /// Derive the code at `index` for the given vault key, salt and generation.
    pub fn derive(vault_key: &VaultKey, salt: &Salt, generation: u32, index: u32) -> Self {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(b"hiddenvault-recovery-code");
        hasher.update(vault_key.as_bytes());
        hasher.update(salt.as_bytes());
        hasher.update(generation.to_le_bytes());
        hasher.update(index.to_le_bytes());

        let mut digest = hasher.finalize();
        let mut entropy = [0u8; RECOVERY_ENTROPY_LEN];
        entropy.copy_from_slice(&digest[..RECOVERY_ENTROPY_LEN]);
        digest.as_mut_slice().zeroize();
        Self { entropy }
    }

    /// Derive `count` codes for one generation.
    pub fn derive_set(vault_key: &VaultKey, salt: &Salt, generation: u32, count: u32) -> Vec<Self> {
        (0..count)
            .map(|index| Self::derive(vault_key, salt, generation, index))
            .collect()
    }

    /// Parse a phrase typed by the user.
    ///
    /// Case and surrounding/duplicate whitespace are ignored; words may also
    /// be separated by dashes.
    ///
    /// # Errors
    /// - `RecoveryCodeInvalid` if the phrase is not a valid 12-word code
    pub fn parse(phrase: &str) -> Result<Self> {
        let normalized = phrase
            .split(|c: char| c.is_whitespace() || c == '-')
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        let mnemonic =
            Mnemonic::parse_normalized(&normalized).map_err(|_| Error::RecoveryCodeInvalid)?;
        let mut bytes = mnemonic.to_entropy();
        if bytes.len() != RECOVERY_ENTROPY_LEN {
            bytes.zeroize();
            return Err(Error::RecoveryCodeInvalid);
        }

        let mut entropy = [0u8; RECOVERY_ENTROPY_LEN];
        entropy.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self { entropy })
    }

    /// Render as a space-separated word phrase.
    pub fn to_phrase(&self) -> Result<String> {
        Mnemonic::from_entropy(&self.entropy)
            .map(|m| m.to_string())
            .map_err(|e| Error::Crypto(format!("Failed to encode recovery code: {}", e)))
    }

    /// Key-encryption key for this code's header slot.
    pub fn recovery_key(&self, salt: &Salt) -> RecoveryKey {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(b"hiddenvault-recovery-kek");
        hasher.update(self.entropy);
        hasher.update(salt.as_bytes());

        let mut digest = hasher.finalize();
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&digest);
        digest.as_mut_slice().zeroize();
        RecoveryKey::from_bytes(key)
    }

    /// Constant-time equality.
    pub fn ct_matches(&self, other: &RecoveryCode) -> bool {
        self.entropy[..].ct_eq(&other.entropy[..]).into()
    }
}

impl std::fmt::Debug for RecoveryCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecoveryCode([REDACTED])")
    }
}
