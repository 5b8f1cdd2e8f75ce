//! Encrypted manifest: entry catalog and audit history.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use hiddenvault_common::{Error, FileId, Result};
use hiddenvault_crypto::{decrypt, encrypt, Digest256, VaultKey, NONCE_SIZE};

/// Metadata for one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: FileId,
    /// Display-only; never used to locate data.
    pub file_name: String,
    /// Display-only; where the file was imported from.
    pub original_path: PathBuf,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Plaintext length in bytes.
    pub size: u64,
    pub mime_type: String,
    #[serde(with = "nonce_b64")]
    pub nonce: [u8; NONCE_SIZE],
    /// BLAKE2b-256 of the stored ciphertext.
    pub ciphertext_hash: Digest256,
    /// Offset within the blob region.
    pub blob_offset: u64,
    /// Stored bytes: ciphertext plus one tag per chunk.
    pub blob_len: u64,
    /// Plaintext bytes per sealed chunk.
    pub chunk_size: u32,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

/// Kind of audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Created,
    Import,
    Export,
    Delete,
    Lock,
    Unlock,
    Recovery,
    RecoveryCodesRotated,
    Compact,
}

/// Result of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure { reason: String },
}

/// One entry of the append-only audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    pub outcome: AuditOutcome,
}

impl AuditEvent {
    pub fn success(action: AuditAction, file_id: Option<FileId>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            file_id,
            outcome: AuditOutcome::Success,
        }
    }

    pub fn failure(action: AuditAction, file_id: Option<FileId>, reason: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            file_id,
            outcome: AuditOutcome::Failure {
                reason: reason.into(),
            },
        }
    }
}

/// One page of entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPage {
    pub entries: Vec<VaultEntry>,
    pub offset: usize,
    /// Total number of entries in the vault.
    pub total: usize,
}

/// Catalog of stored files plus audit history.
///
/// Serialized as JSON and sealed under the vault key as a single AEAD
/// message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultManifest {
    pub entries: BTreeMap<FileId, VaultEntry>,
    pub audit_log: Vec<AuditEvent>,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl VaultManifest {
    /// Fresh manifest carrying a `created` event.
    pub fn new() -> Self {
        let mut manifest = Self::default();
        manifest.record(AuditEvent::success(AuditAction::Created, None));
        manifest
    }

    /// Append an audit event and bump `last_accessed`.
    pub fn record(&mut self, event: AuditEvent) {
        self.last_accessed = Some(event.timestamp);
        self.audit_log.push(event);
    }

    pub fn entry(&self, id: &FileId) -> Result<&VaultEntry> {
        self.entries.get(id).ok_or(Error::FileNotFound(*id))
    }

    /// Entries ordered by creation time.
    pub fn sorted_entries(&self) -> Vec<VaultEntry> {
        let mut entries: Vec<VaultEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        entries
    }

    /// A page of [`sorted_entries`](Self::sorted_entries).
    ///
    /// # Errors
    /// - `InvalidInput` if `limit` is zero
    pub fn page(&self, offset: usize, limit: usize) -> Result<EntryPage> {
        if limit == 0 {
            return Err(Error::InvalidInput("Page limit must be positive".to_string()));
        }
        let sorted = self.sorted_entries();
        let total = sorted.len();
        let entries = sorted.into_iter().skip(offset).take(limit).collect();
        Ok(EntryPage {
            entries,
            offset,
            total,
        })
    }

    /// Total plaintext bytes stored.
    pub fn used_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    /// Serialize and seal under `key` (`nonce || ciphertext || tag`).
    pub fn seal(&self, key: &VaultKey) -> Result<Vec<u8>> {
        let mut json = serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))?;
        let sealed = encrypt(key.as_bytes(), &json);
        json.zeroize();
        sealed
    }

    /// Open a sealed manifest.
    ///
    /// # Errors
    /// - `AuthenticationFailed` if the key is wrong or the bytes were modified
    /// - `CorruptedContainer` if the plaintext is not a manifest
    pub fn open(key: &VaultKey, sealed: &[u8]) -> Result<Self> {
        let mut json = decrypt(key.as_bytes(), sealed)?;
        let manifest = serde_json::from_slice(&json)
            .map_err(|e| Error::CorruptedContainer(format!("Unparsable manifest: {}", e)));
        json.zeroize();
        manifest
    }

    /// Drop every entry and event from memory.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.audit_log.clear();
        self.last_accessed = None;
    }
}

mod nonce_b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    use hiddenvault_crypto::NONCE_SIZE;

    pub fn serialize<S: Serializer>(nonce: &[u8; NONCE_SIZE], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(nonce))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; NONCE_SIZE], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("nonce must be 24 bytes"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    pub(crate) fn sample_entry(name: &str, created_at: DateTime<Utc>) -> VaultEntry {
        VaultEntry {
            id: FileId::generate(),
            file_name: name.to_string(),
            original_path: PathBuf::from("/tmp").join(name),
            tags: vec!["tax".to_string()],
            size: 11,
            mime_type: "text/plain".to_string(),
            nonce: [4u8; NONCE_SIZE],
            ciphertext_hash: Digest256::of(b"ciphertext"),
            blob_offset: 0,
            blob_len: 27,
            chunk_size: 65536,
            created_at,
            accessed_at: created_at,
        }
    }

    #[test]
    fn test_new_manifest_records_creation() {
        let manifest = VaultManifest::new();
        assert!(manifest.entries.is_empty());
        assert_eq!(manifest.audit_log.len(), 1);
        assert_eq!(manifest.audit_log[0].action, AuditAction::Created);
        assert!(manifest.last_accessed.is_some());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = VaultKey::generate();
        let mut manifest = VaultManifest::new();
        let entry = sample_entry("a.txt", Utc::now());
        manifest.entries.insert(entry.id, entry.clone());

        let sealed = manifest.seal(&key).unwrap();
        let opened = VaultManifest::open(&key, &sealed).unwrap();
        assert_eq!(opened.entry(&entry.id).unwrap(), &entry);
        assert_eq!(opened.audit_log, manifest.audit_log);
    }

    #[test]
    fn test_wrong_key_is_authentication_failure() {
        let sealed = VaultManifest::new().seal(&VaultKey::generate()).unwrap();
        assert!(matches!(
            VaultManifest::open(&VaultKey::generate(), &sealed),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_sorted_and_paged() {
        let now = Utc::now();
        let mut manifest = VaultManifest::new();
        for (i, name) in ["c", "a", "b"].iter().enumerate() {
            let entry = sample_entry(name, now + Duration::seconds(i as i64));
            manifest.entries.insert(entry.id, entry);
        }

        let names: Vec<String> = manifest
            .sorted_entries()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);

        let page = manifest.page(1, 5).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].file_name, "a");
        assert!(manifest.page(0, 0).is_err());
    }

    #[test]
    fn test_unknown_entry() {
        let manifest = VaultManifest::new();
        let id = FileId::generate();
        assert!(matches!(manifest.entry(&id), Err(Error::FileNotFound(e)) if e == id));
    }

    #[test]
    fn test_audit_serialization() {
        let event = AuditEvent::failure(AuditAction::Export, None, "tamper detected");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"export\""));
        assert!(json.contains("\"failure\""));

        let rotated = serde_json::to_string(&AuditAction::RecoveryCodesRotated).unwrap();
        assert_eq!(rotated, "\"recovery-codes-rotated\"");
    }

    proptest! {
        #[test]
        fn prop_pages_cover_every_entry_once(count in 0usize..40, limit in 1usize..12) {
            let base = Utc::now();
            let mut manifest = VaultManifest::new();
            for i in 0..count {
                let entry = sample_entry(&format!("f{}", i), base + Duration::seconds(i as i64));
                manifest.entries.insert(entry.id, entry);
            }

            let mut seen = Vec::new();
            let mut offset = 0;
            loop {
                let page = manifest.page(offset, limit).unwrap();
                prop_assert_eq!(page.total, count);
                prop_assert!(page.entries.len() <= limit);
                if page.entries.is_empty() {
                    break;
                }
                offset += page.entries.len();
                seen.extend(page.entries.into_iter().map(|e| e.id));
            }

            let expected: Vec<FileId> = manifest.sorted_entries().into_iter().map(|e| e.id).collect();
            prop_assert_eq!(seen, expected);
        }
    }
}
