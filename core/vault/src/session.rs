//! Vault session management.
//!
//! A session holds the unwrapped vault key and the decrypted manifest of one
//! open container. Keys are zeroized when the session is locked or dropped.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::manifest::{AuditEvent, VaultManifest};
use hiddenvault_common::{Error, Result, VaultId};
use hiddenvault_container::{BlobCopy, ContainerFile, VaultHeader};
use hiddenvault_crypto::VaultKey;

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session is active and keys are available.
    Active,
    /// Session is locked, keys have been cleared.
    Locked,
}

/// Active vault session.
///
/// Owns the container handle; all writes to the container go through the
/// session so the cached layout stays in sync with the file.
pub struct VaultSession {
    vault_id: VaultId,
    container: ContainerFile,
    /// Vault key (zeroized on drop).
    vault_key: Option<VaultKey>,
    manifest: VaultManifest,
    unlocked_at: DateTime<Utc>,
    state: SessionState,
    /// Minimum manifest capacity used when the container is rewritten.
    min_capacity: u64,
}

impl VaultSession {
    /// Wrap an opened container and its already-unwrapped key.
    ///
    /// # Preconditions
    /// - `vault_key` was unwrapped from `container`'s header
    /// - `manifest` was opened with `vault_key`
    pub fn new(
        container: ContainerFile,
        vault_key: VaultKey,
        manifest: VaultManifest,
        min_capacity: u64,
    ) -> Self {
        Self {
            vault_id: container.header().vault_id.clone(),
            container,
            vault_key: Some(vault_key),
            manifest,
            unlocked_at: Utc::now(),
            state: SessionState::Active,
            min_capacity,
        }
    }

    pub fn vault_id(&self) -> &VaultId {
        &self.vault_id
    }

    pub fn path(&self) -> &Path {
        self.container.path()
    }

    pub fn header(&self) -> &VaultHeader {
        self.container.header()
    }

    pub fn container(&self) -> &ContainerFile {
        &self.container
    }

    pub fn unlocked_at(&self) -> DateTime<Utc> {
        self.unlocked_at
    }

    pub fn min_capacity(&self) -> u64 {
        self.min_capacity
    }

    /// Get the vault key, if the session is active.
    ///
    /// # Errors
    /// - `VaultLocked` if the session has been locked
    pub fn vault_key(&self) -> Result<&VaultKey> {
        match self.state {
            SessionState::Active => self
                .vault_key
                .as_ref()
                .ok_or_else(|| Error::VaultLocked(self.vault_id.clone())),
            SessionState::Locked => Err(Error::VaultLocked(self.vault_id.clone())),
        }
    }

    /// Get the manifest, if the session is active.
    pub fn manifest(&self) -> Result<&VaultManifest> {
        self.ensure_active()?;
        Ok(&self.manifest)
    }

    pub fn manifest_mut(&mut self) -> Result<&mut VaultManifest> {
        self.ensure_active()?;
        Ok(&mut self.manifest)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::VaultLocked(self.vault_id.clone()))
        }
    }

    /// Append an audit event to the in-memory manifest.
    pub fn record(&mut self, event: AuditEvent) -> Result<()> {
        self.manifest_mut()?.record(event);
        Ok(())
    }

    /// Seal the manifest and write it to the container.
    ///
    /// # Postconditions
    /// - The container holds the current in-memory manifest
    pub async fn persist(&mut self) -> Result<()> {
        let sealed = self.manifest()?.seal(self.vault_key()?)?;
        self.container
            .write_manifest(&sealed, self.min_capacity)
            .await
    }

    /// Rewrite the container with a new header and the current manifest.
    pub async fn rewrite(&mut self, header: VaultHeader, blobs: BlobCopy) -> Result<()> {
        let sealed = self.manifest()?.seal(self.vault_key()?)?;
        self.container
            .rewrite(&header, &sealed, self.min_capacity, blobs)
            .await
    }

    /// Lock the session, clearing all keys and plaintext metadata.
    ///
    /// # Postconditions
    /// - Vault key is zeroized and removed
    /// - Session state is Locked
    pub fn lock(&mut self) {
        if let Some(key) = self.vault_key.take() {
            drop(key);
        }
        self.manifest.clear();
        self.state = SessionState::Locked;
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        self.lock();
    }
}
