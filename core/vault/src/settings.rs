//! Runtime settings for the vault manager.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hiddenvault_common::{Error, Result};
use hiddenvault_crypto::KdfParams;
use hiddenvault_scanner::ScannerConfig;

/// Settings loaded from JSON. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Idle time after which an unlocked vault locks itself.
    #[serde(rename = "auto_lock_secs", with = "duration_secs")]
    pub auto_lock: Duration,
    /// Argon2id parameters for newly created vaults and password resets.
    pub kdf: KdfParams,
    /// Minimum password length in bytes for create and recovery.
    pub min_password_length: usize,
    /// Ceiling on the total plaintext stored in one vault.
    pub max_vault_size: u64,
    /// Number of recovery codes issued per generation.
    pub recovery_code_count: u32,
    /// Bytes reserved for the sealed manifest in a fresh container.
    pub initial_manifest_capacity: u64,
    /// Compact the container after every delete.
    pub compact_on_delete: bool,
    pub scanner: ScannerConfig,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            auto_lock: Duration::from_secs(300),
            kdf: KdfParams::interactive(),
            min_password_length: 8,
            max_vault_size: 10 * 1024 * 1024 * 1024,
            recovery_code_count: 4,
            initial_manifest_capacity: 64 * 1024,
            compact_on_delete: false,
            scanner: ScannerConfig::default(),
        }
    }
}

impl VaultSettings {
    /// Parse settings from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let settings: Self =
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize to pretty JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load settings from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Check that the settings are usable.
    ///
    /// # Errors
    /// - `InvalidInput` for a zero auto-lock, zero recovery codes, or a
    ///   zero scan depth
    /// - `KeyDerivation` for invalid KDF parameters
    pub fn validate(&self) -> Result<()> {
        if self.auto_lock.is_zero() {
            return Err(Error::InvalidInput(
                "auto_lock_secs must be greater than zero".to_string(),
            ));
        }
        if self.recovery_code_count == 0 || self.recovery_code_count > 16 {
            return Err(Error::InvalidInput(
                "recovery_code_count must be between 1 and 16".to_string(),
            ));
        }
        if self.scanner.max_depth == 0 {
            return Err(Error::InvalidInput(
                "scanner.max_depth must be at least 1".to_string(),
            ));
        }
        self.kdf.validate()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
