//! Argon2id password key derivation.
//!
//! The parameters travel in the plaintext header, so a vault created with
//! one preset still opens after the defaults change.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{PasswordKey, Salt, KEY_LENGTH};
use hiddenvault_common::{Error, Result};

/// Parameters for Argon2id key derivation.
///
/// Stored in the plaintext vault header so the same settings are used
/// when re-opening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory in KiB.
    pub memory_cost: u32,
    /// Passes over memory.
    pub time_cost: u32,
    /// Lanes.
    pub parallelism: u32,
}

impl KdfParams {
    /// Default preset; about a second on a laptop.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Heaviest preset. Expect several seconds per unlock.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Resolve a named preset.
    pub fn from_preset(name: &str) -> Result<Self> {
        match name {
            "interactive" => Ok(Self::interactive()),
            "moderate" => Ok(Self::moderate()),
            "sensitive" => Ok(Self::sensitive()),
            other => Err(Error::InvalidInput(format!(
                "Unknown KDF preset '{}': use interactive, moderate, or sensitive",
                other
            ))),
        }
    }

    fn to_argon2(&self) -> Result<Params> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::KeyDerivation(format!("Invalid KDF parameters: {}", e)))
    }

    /// Check that Argon2 accepts these parameters.
    pub fn validate(&self) -> Result<()> {
        self.to_argon2().map(|_| ())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a password key from a password and salt using Argon2id.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params` must have valid Argon2id parameters
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - `KeyDerivation` if password is empty, parameters are invalid, or
///   Argon2 fails to allocate its memory
///
/// # Security
/// - Password is not stored or logged
/// - Intermediate buffer is moved into a zeroizing key type
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<PasswordKey> {
    if password.is_empty() {
        return Err(Error::KeyDerivation("Password cannot be empty".to_string()));
    }

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::KeyDerivation(format!("Key derivation failed: {}", e)))?;

    Ok(PasswordKey::from_bytes(key_bytes))
}
