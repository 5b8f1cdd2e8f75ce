//! Common error types for Hidden Vault.

use thiserror::Error;

use crate::types::{FileId, VaultId};

/// Top-level error type for Hidden Vault operations.
///
/// Wrong passwords and corrupted manifest ciphertext both surface as
/// [`Error::AuthenticationFailed`] so callers cannot tell them apart.
#[derive(Debug, Error)]
pub enum Error {
    /// Key derivation rejected its parameters or ran out of resources.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// AEAD tag did not verify (wrong key or modified ciphertext).
    #[error("Cannot unlock vault: authentication failed")]
    AuthenticationFailed,

    /// Container layout could not be parsed.
    #[error("Corrupted container: {0}")]
    CorruptedContainer(String),

    /// Stored ciphertext digest does not match the manifest.
    #[error("Integrity check failed for entry {0}: stored data was modified")]
    TamperDetected(FileId),

    /// No session was ever opened for this vault id.
    #[error("No session for vault {0}")]
    SessionNotFound(VaultId),

    /// The vault was open but has been locked (explicitly or by timeout).
    #[error("Vault {0} is locked")]
    VaultLocked(VaultId),

    /// A session for this vault id is already live for another container.
    #[error("Vault {0} is already open from a different location")]
    AlreadyOpen(VaultId),

    /// Unknown file id.
    #[error("File not found in vault: {0}")]
    FileNotFound(FileId),

    /// Recovery code did not match any recovery slot.
    #[error("Recovery code is invalid")]
    RecoveryCodeInvalid,

    /// Import would exceed the configured vault size.
    #[error("Vault size limit exceeded: {used} + {requested} bytes > {limit} bytes")]
    VaultFull { used: u64, requested: u64, limit: u64 },

    /// The file was imported but the original could not be removed.
    #[error("File imported as {file_id} but source could not be removed: {reason}")]
    SourceNotRemoved { file_id: FileId, reason: String },

    /// Cryptographic primitive misuse (bad key length, short input).
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// True for errors that mean "no usable session".
    pub fn is_locked(&self) -> bool {
        matches!(self, Error::VaultLocked(_) | Error::SessionNotFound(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
