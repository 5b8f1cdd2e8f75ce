//! Common types used throughout Hidden Vault.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a vault.
///
/// Generated once at creation and stored in the plaintext header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultId(Uuid);

impl VaultId {
    /// Generate a fresh random vault id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a vault id from its string form.
    ///
    /// # Errors
    /// - Returns error if `id` is not a UUID
    pub fn parse(id: &str) -> crate::Result<Self> {
        Uuid::parse_str(id.trim())
            .map(Self)
            .map_err(|e| crate::Error::InvalidInput(format!("Invalid vault id '{}': {}", id, e)))
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VaultId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

/// Identifier of a file stored in a vault. Immutable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Generate a fresh random file id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a file id from its string form.
    pub fn parse(id: &str) -> crate::Result<Self> {
        Uuid::parse_str(id.trim())
            .map(Self)
            .map_err(|e| crate::Error::InvalidInput(format!("Invalid file id '{}': {}", id, e)))
    }

    /// Raw bytes, used as associated data when sealing blobs.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}
