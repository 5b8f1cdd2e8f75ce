//! Vault manager: the registry of open sessions and the public operation
//! surface.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::autolock::{AutoLock, Deadline};
use crate::blob;
use crate::manifest::{AuditAction, AuditEvent, EntryPage, VaultEntry, VaultManifest};
use crate::recovery::{self, RecoveryCodes};
use crate::session::VaultSession;
use crate::settings::VaultSettings;
use hiddenvault_common::{guess_mime_type, Error, FileId, Result, VaultId};
use hiddenvault_container::{
    packed_offsets, BlobCopy, ContainerFile, DecoyLink, FormatVersion, KeySlot, VaultHeader,
};
use hiddenvault_crypto::{
    derive_key, KdfParams, PasswordKey, Salt, VaultKey, DEFAULT_CHUNK_SIZE,
};
use hiddenvault_scanner::{ContentScanner, SensitiveFileCandidate};

/// Suffix appended to a vault's file name to locate its decoy.
pub const DECOY_SUFFIX: &str = ".decoy";

/// Header facts readable without a password.
#[derive(Debug, Clone, Serialize)]
pub struct VaultSummary {
    pub vault_id: VaultId,
    pub name: String,
    pub version: FormatVersion,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub kdf_params: KdfParams,
    pub recovery_generation: u32,
    pub recovery_slots: usize,
    pub decoy: Option<PathBuf>,
    pub manifest_capacity: u64,
    /// Bytes in the blob region, orphaned ciphertext included.
    pub blob_region_len: u64,
}

struct SessionSlot {
    /// Canonical path of the container this session was opened from.
    path: PathBuf,
    session: Arc<RwLock<VaultSession>>,
    autolock: AutoLock,
}

/// Borrowed view of a live session for the duration of one operation.
struct LiveSession {
    session: Arc<RwLock<VaultSession>>,
    deadline: Deadline,
}

struct Registry {
    settings: VaultSettings,
    sessions: RwLock<HashMap<VaultId, SessionSlot>>,
    /// Vault ids unlocked through this manager and not forgotten since.
    /// Operations on these report `VaultLocked` rather than
    /// `SessionNotFound` once their session is gone.
    known: RwLock<HashSet<VaultId>>,
}

impl Registry {
    /// Lock a session whose deadline has passed.
    ///
    /// Waits for any operation still holding the session, then checks the
    /// deadline again; an operation that finished in the meantime has
    /// pushed it back. `owner` restricts the call to one particular
    /// session. Returns `false` while the session stays live.
    async fn expire(
        &self,
        vault_id: &VaultId,
        owner: Option<&Weak<RwLock<VaultSession>>>,
    ) -> bool {
        let session = {
            let sessions = self.sessions.read().await;
            match sessions.get(vault_id) {
                Some(slot) if owns(owner, &slot.session) => {
                    if !slot.autolock.deadline().expired() {
                        return false;
                    }
                    slot.session.clone()
                }
                _ => return true,
            }
        };

        let mut guard = session.write().await;
        let slot = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(vault_id) {
                Some(slot) if Arc::ptr_eq(&slot.session, &session) => {
                    if !slot.autolock.deadline().expired() {
                        return false;
                    }
                    sessions.remove(vault_id)
                }
                _ => return true,
            }
        };

        if let Some(mut slot) = slot {
            if owner.is_some() {
                // Called from the timer task itself; aborting it here would
                // cancel the close below.
                slot.autolock.detach();
            }
            info!(vault_id = %vault_id, "Auto-locking idle vault");
            close_session(&mut guard).await;
        }
        true
    }

    async fn close(&self, slot: SessionSlot) {
        let mut session = slot.session.write().await;
        close_session(&mut session).await;
    }
}

fn owns(owner: Option<&Weak<RwLock<VaultSession>>>, session: &Arc<RwLock<VaultSession>>) -> bool {
    owner.map_or(true, |owner| ptr::eq(owner.as_ptr(), Arc::as_ptr(session)))
}

/// Record a lock event, persist, and zeroize.
async fn close_session(session: &mut VaultSession) {
    if !session.is_active() {
        return;
    }

    if session
        .record(AuditEvent::success(AuditAction::Lock, None))
        .is_ok()
    {
        if let Err(e) = session.persist().await {
            warn!(vault_id = %session.vault_id(), error = %e, "Failed to persist lock event");
        }
    }
    session.lock();
    info!(vault_id = %session.vault_id(), "Vault locked");
}

/// Vault manager for creating, opening and operating on vaults.
///
/// Holds at most one live session per vault id. Sessions lock themselves
/// after the configured idle time and are zeroized when the manager is
/// dropped.
#[derive(Clone)]
pub struct VaultManager {
    inner: Arc<Registry>,
}

impl VaultManager {
    /// Create a manager with the given settings.
    ///
    /// # Errors
    /// - `InvalidInput` or `KeyDerivation` if the settings do not validate
    pub fn new(settings: VaultSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(Registry {
                settings,
                sessions: RwLock::new(HashMap::new()),
                known: RwLock::new(HashSet::new()),
            }),
        })
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.inner.settings
    }

    /// Create a new vault container.
    ///
    /// # Preconditions
    /// - No file exists at `path`
    /// - `password` meets the configured minimum length
    ///
    /// # Postconditions
    /// - A container with an empty manifest exists at `path`
    /// - Returns the vault id and the first generation of recovery codes;
    ///   the codes are not stored anywhere
    ///
    /// # Errors
    /// - `AlreadyExists` if `path` is taken
    /// - `InvalidInput` for a short password or empty name
    pub async fn create(
        &self,
        path: &Path,
        password: &[u8],
        name: &str,
    ) -> Result<(VaultId, RecoveryCodes)> {
        self.check_password(password)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Vault name cannot be empty".to_string()));
        }
        if fs::try_exists(path).await? {
            return Err(Error::AlreadyExists(format!(
                "Vault already exists at {}",
                path.display()
            )));
        }

        let settings = &self.inner.settings;
        let vault_key = VaultKey::generate();
        let salt = Salt::generate();
        let password_key = derive_password_key(password, &salt, &settings.kdf).await?;
        let (recovery, codes) =
            recovery::issue(&vault_key, &salt, 0, settings.recovery_code_count)?;

        let now = Utc::now();
        let header = VaultHeader {
            version: FormatVersion::CURRENT,
            vault_id: VaultId::generate(),
            name: name.to_string(),
            salt,
            kdf_params: settings.kdf.clone(),
            created_at: now,
            modified_at: now,
            decoy: None,
            password_slot: KeySlot(vault_key.wrap(password_key.as_bytes())?),
            recovery,
        };

        let sealed = VaultManifest::new().seal(&vault_key)?;
        ContainerFile::create(path, &header, &sealed, settings.initial_manifest_capacity).await?;

        info!(vault_id = %header.vault_id, path = %path.display(), "Vault created");
        Ok((header.vault_id, codes))
    }

    /// Unlock a vault and start a session.
    ///
    /// Opening a vault that already has a live session from the same file
    /// re-checks the password and reuses that session.
    ///
    /// # Postconditions
    /// - A session exists for the returned vault id
    /// - The auto-lock deadline is `now + auto_lock`
    ///
    /// # Errors
    /// - `NotFound` if there is no file at `path`
    /// - `CorruptedContainer` if the header cannot be parsed
    /// - `AuthenticationFailed` for a wrong password or corrupted manifest
    /// - `AlreadyOpen` if a different file with the same vault id is open
    pub async fn open(&self, path: &Path, password: &[u8]) -> Result<(VaultId, Vec<VaultEntry>)> {
        let container = ContainerFile::open(path).await?;
        let canonical = fs::canonicalize(path).await?;
        let header = container.header().clone();
        let vault_id = header.vault_id.clone();

        // A session past its deadline whose timer has not fired yet must
        // not be reused.
        self.inner.expire(&vault_id, None).await;

        let existing = {
            let sessions = self.inner.sessions.read().await;
            sessions.get(&vault_id).map(|slot| {
                (
                    slot.path.clone(),
                    LiveSession {
                        session: slot.session.clone(),
                        deadline: slot.autolock.deadline().clone(),
                    },
                )
            })
        };

        if let Some((open_path, live)) = existing {
            if open_path != canonical {
                return Err(Error::AlreadyOpen(vault_id));
            }
            let password_key =
                derive_password_key(password, &header.salt, &header.kdf_params).await?;
            VaultKey::unwrap_from(password_key.as_bytes(), header.password_slot.as_bytes())?;
            let entries = live.session.read().await.manifest()?.sorted_entries();
            live.deadline.touch();
            debug!(vault_id = %vault_id, "Reusing open session");
            return Ok((vault_id, entries));
        }

        let password_key = derive_password_key(password, &header.salt, &header.kdf_params).await?;
        let vault_key =
            VaultKey::unwrap_from(password_key.as_bytes(), header.password_slot.as_bytes())?;
        drop(password_key);

        let sealed = container.read_manifest().await?;
        let manifest = VaultManifest::open(&vault_key, &sealed)?;

        let mut session = VaultSession::new(
            container,
            vault_key,
            manifest,
            self.inner.settings.initial_manifest_capacity,
        );
        session.record(AuditEvent::success(AuditAction::Unlock, None))?;
        session.persist().await?;
        let entries = session.manifest()?.sorted_entries();

        {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.contains_key(&vault_id) {
                return Err(Error::AlreadyOpen(vault_id));
            }

            let session = Arc::new(RwLock::new(session));
            let registry = Arc::downgrade(&self.inner);
            let owner = Arc::downgrade(&session);
            let expiring = vault_id.clone();
            let autolock = AutoLock::spawn(self.inner.settings.auto_lock, move || {
                expire_later(registry.clone(), expiring.clone(), owner.clone())
            });

            sessions.insert(
                vault_id.clone(),
                SessionSlot {
                    path: canonical,
                    session,
                    autolock,
                },
            );
        }
        self.inner.known.write().await.insert(vault_id.clone());

        info!(vault_id = %vault_id, entries = entries.len(), "Vault unlocked");
        Ok((vault_id, entries))
    }

    /// Whether a live, unexpired session exists for `vault_id`.
    pub async fn is_unlocked(&self, vault_id: &VaultId) -> bool {
        self.live(vault_id).await.is_ok()
    }

    /// All entries, ordered by creation time.
    pub async fn list_entries(&self, vault_id: &VaultId) -> Result<Vec<VaultEntry>> {
        let live = self.live(vault_id).await?;
        let session = live.session.read().await;
        let entries = session.manifest()?.sorted_entries();
        live.deadline.touch();
        Ok(entries)
    }

    /// One page of entries, ordered by creation time.
    pub async fn list_entries_page(
        &self,
        vault_id: &VaultId,
        offset: usize,
        limit: usize,
    ) -> Result<EntryPage> {
        let live = self.live(vault_id).await?;
        let session = live.session.read().await;
        let page = session.manifest()?.page(offset, limit)?;
        live.deadline.touch();
        Ok(page)
    }

    /// Encrypt a file into the vault.
    ///
    /// # Postconditions
    /// - A new entry with a fresh id and nonce is in the manifest
    /// - The manifest is persisted
    /// - If `delete_source`, the original file is removed afterwards
    ///
    /// # Errors
    /// - `NotFound` / `InvalidInput` if `source` is missing or not a file
    /// - `VaultFull` if the import would exceed `max_vault_size`
    /// - `SourceNotRemoved` if the import committed but the original could
    ///   not be deleted
    pub async fn import_file(
        &self,
        vault_id: &VaultId,
        source: &Path,
        tags: Vec<String>,
        delete_source: bool,
    ) -> Result<FileId> {
        let live = self.live(vault_id).await?;

        let metadata = fs::metadata(source).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("Source file not found: {}", source.display()))
            }
            _ => Error::Io(e),
        })?;
        if !metadata.is_file() {
            return Err(Error::InvalidInput(format!(
                "Not a regular file: {}",
                source.display()
            )));
        }
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidInput("Source has no file name".to_string()))?;

        let limit = self.inner.settings.max_vault_size;
        let mut session = live.session.write().await;
        let used = session.manifest()?.used_bytes();
        if used.saturating_add(metadata.len()) > limit {
            return Err(Error::VaultFull {
                used,
                requested: metadata.len(),
                limit,
            });
        }

        let file_id = FileId::generate();
        let mut reader = fs::File::open(source).await?;
        let sealed = blob::append_blob(
            session.container(),
            session.vault_key()?,
            file_id,
            &mut reader,
            DEFAULT_CHUNK_SIZE,
            used,
            limit,
        )
        .await?;

        let now = Utc::now();
        let entry = VaultEntry {
            id: file_id,
            file_name,
            original_path: source.to_path_buf(),
            tags,
            size: sealed.size,
            mime_type: guess_mime_type(source).to_string(),
            nonce: sealed.nonce,
            ciphertext_hash: sealed.hash,
            blob_offset: sealed.offset,
            blob_len: sealed.len,
            chunk_size: DEFAULT_CHUNK_SIZE as u32,
            created_at: now,
            accessed_at: now,
        };

        {
            let manifest = session.manifest_mut()?;
            manifest.entries.insert(file_id, entry);
            manifest.record(AuditEvent::success(AuditAction::Import, Some(file_id)));
        }

        if let Err(e) = session.persist().await {
            if let Ok(manifest) = session.manifest_mut() {
                manifest.entries.remove(&file_id);
                manifest.audit_log.pop();
            }
            if let Err(truncate_err) = session.container().truncate_blobs(sealed.offset).await {
                warn!(vault_id = %vault_id, error = %truncate_err, "Failed to drop uncommitted blob");
            }
            return Err(e);
        }
        live.deadline.touch();
        drop(session);

        info!(vault_id = %vault_id, file_id = %file_id, size = sealed.size, "File imported");

        if delete_source {
            fs::remove_file(source)
                .await
                .map_err(|e| Error::SourceNotRemoved {
                    file_id,
                    reason: e.to_string(),
                })?;
            debug!(file_id = %file_id, "Source file removed");
        }
        Ok(file_id)
    }

    /// Decrypt an entry to `output`.
    ///
    /// The stored ciphertext is hashed and compared before any decryption.
    /// A mismatch is recorded in the audit log as a failed export.
    ///
    /// # Errors
    /// - `FileNotFound` if `file_id` is not in the vault
    /// - `TamperDetected` if the stored ciphertext was modified
    pub async fn export_file(&self, vault_id: &VaultId, file_id: FileId, output: &Path) -> Result<()> {
        let live = self.live(vault_id).await?;

        // The read lock is held across the hash, the decryption and the
        // rename so a compaction cannot move the blob underneath.
        let outcome = {
            let session = live.session.read().await;
            let entry = session.manifest()?.entry(&file_id)?.clone();
            let outcome = match blob::verify_blob(session.container(), &entry).await {
                Ok(()) => {
                    blob::export_blob(session.container(), session.vault_key()?, &entry, output)
                        .await
                }
                Err(e) => Err(e),
            };
            live.deadline.touch();
            outcome
        };

        let mut session = live.session.write().await;
        if !session.is_active() {
            return outcome;
        }

        match outcome {
            Ok(()) => {
                {
                    let manifest = session.manifest_mut()?;
                    if let Some(entry) = manifest.entries.get_mut(&file_id) {
                        entry.accessed_at = Utc::now();
                    }
                    manifest.record(AuditEvent::success(AuditAction::Export, Some(file_id)));
                }
                session.persist().await?;
                live.deadline.touch();
                drop(session);
                info!(vault_id = %vault_id, file_id = %file_id, "File exported");
                Ok(())
            }
            Err(Error::TamperDetected(id)) => {
                warn!(vault_id = %vault_id, file_id = %id, "Stored ciphertext does not match its digest");
                session.record(AuditEvent::failure(
                    AuditAction::Export,
                    Some(id),
                    "tamper detected",
                ))?;
                if let Err(e) = session.persist().await {
                    warn!(vault_id = %vault_id, error = %e, "Failed to persist tamper event");
                }
                Err(Error::TamperDetected(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Remove an entry from the vault.
    ///
    /// The ciphertext stays in the container as orphaned bytes until the
    /// next compaction (immediately, if `compact_on_delete` is set).
    ///
    /// # Errors
    /// - `FileNotFound` if `file_id` is not in the vault
    pub async fn delete_entry(&self, vault_id: &VaultId, file_id: FileId) -> Result<()> {
        let live = self.live(vault_id).await?;
        let mut session = live.session.write().await;

        let removed = {
            let manifest = session.manifest_mut()?;
            let removed = manifest
                .entries
                .remove(&file_id)
                .ok_or(Error::FileNotFound(file_id))?;
            manifest.record(AuditEvent::success(AuditAction::Delete, Some(file_id)));
            removed
        };

        if let Err(e) = session.persist().await {
            if let Ok(manifest) = session.manifest_mut() {
                manifest.entries.insert(file_id, removed);
                manifest.audit_log.pop();
            }
            return Err(e);
        }

        if self.inner.settings.compact_on_delete {
            if let Err(e) = compact_session(&mut session).await {
                warn!(vault_id = %vault_id, error = %e, "Compaction after delete failed");
            }
        }
        live.deadline.touch();
        drop(session);

        info!(vault_id = %vault_id, file_id = %file_id, "File deleted");
        Ok(())
    }

    /// Rewrite the container without orphaned ciphertext.
    ///
    /// Returns the number of blob-region bytes reclaimed.
    pub async fn compact(&self, vault_id: &VaultId) -> Result<u64> {
        let live = self.live(vault_id).await?;
        let mut session = live.session.write().await;
        let reclaimed = compact_session(&mut session).await?;
        live.deadline.touch();
        drop(session);

        info!(vault_id = %vault_id, reclaimed, "Vault compacted");
        Ok(reclaimed)
    }

    /// The audit log, oldest first.
    pub async fn audit_log(&self, vault_id: &VaultId) -> Result<Vec<AuditEvent>> {
        let live = self.live(vault_id).await?;
        let session = live.session.read().await;
        let events = session.manifest()?.audit_log.clone();
        live.deadline.touch();
        Ok(events)
    }

    /// Lock a vault and zeroize its key.
    ///
    /// Locking a vault that is already locked is a no-op.
    ///
    /// # Errors
    /// - `SessionNotFound` if this manager never opened `vault_id`
    pub async fn lock(&self, vault_id: &VaultId) -> Result<()> {
        let slot = self.inner.sessions.write().await.remove(vault_id);
        match slot {
            Some(slot) => {
                self.inner.close(slot).await;
                Ok(())
            }
            None if self.inner.known.read().await.contains(vault_id) => Ok(()),
            None => Err(Error::SessionNotFound(vault_id.clone())),
        }
    }

    /// Lock `vault_id` if it is open and drop it from this manager's memory.
    ///
    /// Afterwards operations on it report `SessionNotFound`, as for a vault
    /// this manager never opened.
    pub async fn forget(&self, vault_id: &VaultId) {
        let slot = self.inner.sessions.write().await.remove(vault_id);
        if let Some(slot) = slot {
            self.inner.close(slot).await;
        }
        if self.inner.known.write().await.remove(vault_id) {
            debug!(vault_id = %vault_id, "Vault forgotten");
        }
    }

    /// Lock every open vault.
    pub async fn lock_all(&self) {
        let slots: Vec<SessionSlot> = {
            let mut sessions = self.inner.sessions.write().await;
            sessions.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            self.inner.close(slot).await;
        }
    }

    /// Replace all recovery codes with a new generation.
    ///
    /// # Postconditions
    /// - Codes of every earlier generation are invalid
    pub async fn generate_recovery_codes(&self, vault_id: &VaultId) -> Result<RecoveryCodes> {
        let live = self.live(vault_id).await?;
        let mut session = live.session.write().await;

        let mut header = session.header().clone();
        let generation = next_generation(&header)?;
        let (slots, codes) = recovery::issue(
            session.vault_key()?,
            &header.salt,
            generation,
            self.inner.settings.recovery_code_count,
        )?;
        header.recovery = slots;
        header.touch();

        session.record(AuditEvent::success(AuditAction::RecoveryCodesRotated, None))?;
        if let Err(e) = session.rewrite(header, BlobCopy::All).await {
            if let Ok(manifest) = session.manifest_mut() {
                manifest.audit_log.pop();
            }
            return Err(e);
        }
        live.deadline.touch();
        drop(session);

        info!(vault_id = %vault_id, generation, "Recovery codes rotated");
        Ok(codes)
    }

    /// Check a recovery code against a vault file without changing it.
    pub async fn verify_recovery_code(&self, vault_path: &Path, code: &str) -> Result<bool> {
        let container = ContainerFile::open(vault_path).await?;
        match recovery::unwrap_with_phrase(container.header(), code) {
            Ok(_) => Ok(true),
            Err(Error::RecoveryCodeInvalid) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Reset the password of a vault using a recovery code.
    ///
    /// # Postconditions
    /// - The vault opens with `new_password`; the old password no longer works
    /// - All entries are intact
    /// - A new generation of codes is returned; every earlier code is invalid
    ///
    /// # Errors
    /// - `RecoveryCodeInvalid` if the code does not match; the file is left
    ///   untouched
    /// - `InvalidInput` if `new_password` is too short
    pub async fn recover_password(
        &self,
        vault_path: &Path,
        recovery_code: &str,
        new_password: &[u8],
    ) -> Result<RecoveryCodes> {
        self.check_password(new_password)?;

        let container = ContainerFile::open(vault_path).await?;
        let vault_key = recovery::unwrap_with_phrase(container.header(), recovery_code)?;
        let vault_id = container.header().vault_id.clone();
        drop(container);

        // A live session would keep writing with the old layout.
        let canonical = fs::canonicalize(vault_path).await?;
        let slot = {
            let mut sessions = self.inner.sessions.write().await;
            match sessions.get(&vault_id) {
                Some(slot) if slot.path == canonical => sessions.remove(&vault_id),
                _ => None,
            }
        };
        if let Some(slot) = slot {
            self.inner.close(slot).await;
        }

        let mut container = ContainerFile::open(vault_path).await?;
        let mut manifest = VaultManifest::open(&vault_key, &container.read_manifest().await?)?;

        let settings = &self.inner.settings;
        let mut header = container.header().clone();
        header.salt = Salt::generate();
        header.kdf_params = settings.kdf.clone();
        let password_key =
            derive_password_key(new_password, &header.salt, &header.kdf_params).await?;
        header.password_slot = KeySlot(vault_key.wrap(password_key.as_bytes())?);

        let generation = next_generation(&header)?;
        let (slots, codes) = recovery::issue(
            &vault_key,
            &header.salt,
            generation,
            settings.recovery_code_count,
        )?;
        header.recovery = slots;
        header.touch();

        manifest.record(AuditEvent::success(AuditAction::Recovery, None));
        let sealed = manifest.seal(&vault_key)?;
        container
            .rewrite(
                &header,
                &sealed,
                settings.initial_manifest_capacity,
                BlobCopy::All,
            )
            .await?;

        info!(vault_id = %vault_id, generation, "Password reset with recovery code");
        Ok(codes)
    }

    /// Location of the decoy for a main vault file.
    pub fn decoy_path(main_path: &Path) -> Result<PathBuf> {
        let name = main_path.file_name().ok_or_else(|| {
            Error::InvalidInput(format!("Invalid vault path: {}", main_path.display()))
        })?;
        Ok(main_path.with_file_name(format!("{}{}", name.to_string_lossy(), DECOY_SUFFIX)))
    }

    /// Create a decoy vault beside `main_path` and link it from the main
    /// vault's header.
    ///
    /// The decoy is an independent vault with its own password and codes.
    ///
    /// # Errors
    /// - `NotFound` if the main vault does not exist
    /// - `AlreadyExists` if the main vault already has a decoy
    pub async fn create_decoy(
        &self,
        main_path: &Path,
        password: &[u8],
        name: &str,
    ) -> Result<(VaultId, RecoveryCodes)> {
        let main = ContainerFile::open(main_path).await?;
        let decoy_path = Self::decoy_path(main_path)?;
        if main.header().decoy.is_some() || fs::try_exists(&decoy_path).await? {
            return Err(Error::AlreadyExists(format!(
                "Decoy already exists for {}",
                main_path.display()
            )));
        }
        let main_id = main.header().vault_id.clone();
        drop(main);

        let (decoy_id, codes) = self.create(&decoy_path, password, name).await?;

        let link = DecoyLink {
            file_name: decoy_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        if let Err(e) = self.link_decoy(main_path, &main_id, link).await {
            if let Err(remove_err) = fs::remove_file(&decoy_path).await {
                warn!(error = %remove_err, "Failed to remove unlinked decoy");
            }
            return Err(e);
        }

        info!(vault_id = %main_id, decoy_id = %decoy_id, "Decoy vault created");
        Ok((decoy_id, codes))
    }

    async fn link_decoy(&self, main_path: &Path, main_id: &VaultId, link: DecoyLink) -> Result<()> {
        let canonical = fs::canonicalize(main_path).await?;
        let live = {
            let sessions = self.inner.sessions.read().await;
            sessions
                .get(main_id)
                .filter(|slot| slot.path == canonical)
                .map(|slot| slot.session.clone())
        };

        // An open session owns the container handle; route the rewrite
        // through it so its layout stays current.
        if let Some(session) = live {
            let mut session = session.write().await;
            if session.is_active() {
                let mut header = session.header().clone();
                header.decoy = Some(link);
                header.touch();
                return session.rewrite(header, BlobCopy::All).await;
            }
        }

        let mut container = ContainerFile::open(main_path).await?;
        let sealed = container.read_manifest().await?;
        let mut header = container.header().clone();
        header.decoy = Some(link);
        header.touch();
        let capacity = container.layout().manifest_capacity;
        container
            .rewrite(&header, &sealed, capacity, BlobCopy::All)
            .await
    }

    /// Read the plaintext header of a vault file. No password needed.
    pub async fn inspect(&self, path: &Path) -> Result<VaultSummary> {
        let container = ContainerFile::open(path).await?;
        let header = container.header();
        let decoy = header
            .decoy
            .as_ref()
            .map(|link| path.with_file_name(&link.file_name));

        Ok(VaultSummary {
            vault_id: header.vault_id.clone(),
            name: header.name.clone(),
            version: header.version,
            created_at: header.created_at,
            modified_at: header.modified_at,
            kdf_params: header.kdf_params.clone(),
            recovery_generation: header.recovery.generation,
            recovery_slots: header.recovery.slots.len(),
            decoy,
            manifest_capacity: container.layout().manifest_capacity,
            blob_region_len: container.blob_region_len().await?,
        })
    }

    /// Propose files in `directory` that look sensitive.
    ///
    /// Runs on a blocking thread; needs no session.
    pub async fn scan_directory_for_sensitive_files(
        &self,
        directory: &Path,
    ) -> Result<Vec<SensitiveFileCandidate>> {
        let config = self.inner.settings.scanner.clone();
        let directory = directory.to_path_buf();
        tokio::task::spawn_blocking(move || {
            ContentScanner::new(config)?.scan_directory(&directory)
        })
        .await
        .map_err(|e| Error::InvalidInput(format!("Scan task failed: {}", e)))?
    }

    async fn live(&self, vault_id: &VaultId) -> Result<LiveSession> {
        {
            let sessions = self.inner.sessions.read().await;
            if let Some(slot) = sessions.get(vault_id) {
                if slot.autolock.deadline().expired() {
                    return Err(Error::VaultLocked(vault_id.clone()));
                }
                slot.autolock.deadline().touch();
                return Ok(LiveSession {
                    session: slot.session.clone(),
                    deadline: slot.autolock.deadline().clone(),
                });
            }
        }

        if self.inner.known.read().await.contains(vault_id) {
            Err(Error::VaultLocked(vault_id.clone()))
        } else {
            Err(Error::SessionNotFound(vault_id.clone()))
        }
    }

    fn check_password(&self, password: &[u8]) -> Result<()> {
        let min = self.inner.settings.min_password_length;
        if password.len() < min {
            return Err(Error::InvalidInput(format!(
                "Password must be at least {} characters",
                min
            )));
        }
        Ok(())
    }
}

async fn expire_later(
    registry: Weak<Registry>,
    vault_id: VaultId,
    owner: Weak<RwLock<VaultSession>>,
) -> bool {
    match registry.upgrade() {
        Some(registry) => registry.expire(&vault_id, Some(&owner)).await,
        None => true,
    }
}

async fn derive_password_key(
    password: &[u8],
    salt: &Salt,
    params: &KdfParams,
) -> Result<PasswordKey> {
    let password = Zeroizing::new(password.to_vec());
    let salt = salt.clone();
    let params = params.clone();
    tokio::task::spawn_blocking(move || derive_key(&password, &salt, &params))
        .await
        .map_err(|e| Error::KeyDerivation(format!("Key derivation task failed: {}", e)))?
}

fn next_generation(header: &VaultHeader) -> Result<u32> {
    header
        .recovery
        .generation
        .checked_add(1)
        .ok_or_else(|| Error::InvalidInput("Recovery generation exhausted".to_string()))
}

/// Drop orphaned ciphertext by rewriting the container with only the
/// blobs the manifest references, packed in their current order.
async fn compact_session(session: &mut VaultSession) -> Result<u64> {
    let before = session.container().blob_region_len().await?;
    let snapshot = session.manifest()?.clone();

    let mut live: Vec<(FileId, u64, u64)> = snapshot
        .entries
        .values()
        .map(|e| (e.id, e.blob_offset, e.blob_len))
        .collect();
    live.sort_by_key(|(_, offset, _)| *offset);

    let ranges: Vec<(u64, u64)> = live.iter().map(|(_, offset, len)| (*offset, *len)).collect();
    let offsets = packed_offsets(&ranges);

    {
        let manifest = session.manifest_mut()?;
        for ((id, _, _), offset) in live.iter().zip(offsets) {
            if let Some(entry) = manifest.entries.get_mut(id) {
                entry.blob_offset = offset;
            }
        }
        manifest.record(AuditEvent::success(AuditAction::Compact, None));
    }

    let mut header = session.header().clone();
    header.touch();
    if let Err(e) = session.rewrite(header, BlobCopy::Ranges(ranges)).await {
        *session.manifest_mut()? = snapshot;
        return Err(e);
    }

    let after = session.container().blob_region_len().await?;
    Ok(before.saturating_sub(after))
}
