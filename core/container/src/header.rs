//! Plaintext vault header.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use hiddenvault_common::{Error, Result, VaultId};
use hiddenvault_crypto::{KdfParams, Salt};

/// Container format version for migration support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    /// Current container format version.
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    /// Check if this version is compatible with the current version.
    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Vault key sealed under a key-encryption key (`nonce || ciphertext || tag`).
///
/// Serialized as base64 in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySlot(pub Vec<u8>);

impl KeySlot {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for KeySlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for KeySlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(KeySlot)
            .map_err(serde::de::Error::custom)
    }
}

/// Recovery key slots, one per issued code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySlots {
    /// Incremented whenever a new code set is issued.
    pub generation: u32,
    pub slots: Vec<KeySlot>,
}

/// Link from a main vault to its decoy container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoyLink {
    /// File name of the decoy, relative to the main vault's directory.
    pub file_name: String,
}

/// Plaintext header at the start of every container.
///
/// Holds everything needed to derive keys but nothing secret: the salt and
/// KDF parameters are public, and key slots are AEAD-sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultHeader {
    pub version: FormatVersion,
    pub vault_id: VaultId,
    /// Display name chosen at creation.
    #[serde(default)]
    pub name: String,
    pub salt: Salt,
    pub kdf_params: KdfParams,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoy: Option<DecoyLink>,
    /// Vault key sealed under the password key.
    pub password_slot: KeySlot,
    #[serde(default)]
    pub recovery: RecoverySlots,
}

impl VaultHeader {
    /// Serialize to compact JSON. Compact JSON never contains a raw newline,
    /// so it cannot collide with the boundary marker.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse header bytes.
    ///
    /// # Errors
    /// - `CorruptedContainer` if the bytes are not a valid header or the
    ///   format version is unsupported
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::CorruptedContainer(format!("Unparsable header: {}", e)))?;

        if !header.version.is_compatible() {
            return Err(Error::CorruptedContainer(format!(
                "Unsupported format version {}.{}",
                header.version.major, header.version.minor
            )));
        }
        Ok(header)
    }

    /// Bump the modification timestamp.
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}
