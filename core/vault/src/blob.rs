//! Streaming blob import and export.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::warn;
use zeroize::Zeroizing;

use crate::manifest::VaultEntry;
use hiddenvault_common::{Error, FileId, Result};
use hiddenvault_container::{BlobWriter, ContainerFile};
use hiddenvault_crypto::{
    generate_nonce, BlobOpener, BlobSealer, CiphertextHasher, Digest256, VaultKey, NONCE_SIZE,
    TAG_SIZE,
};

/// Location and integrity data of a freshly appended blob.
#[derive(Debug, Clone)]
pub(crate) struct SealedBlob {
    pub nonce: [u8; NONCE_SIZE],
    pub hash: Digest256,
    pub offset: u64,
    pub len: u64,
    /// Plaintext bytes consumed.
    pub size: u64,
}

/// Seal `source` chunk by chunk and append it to the container.
///
/// The vault already holds `used` plaintext bytes and may hold at most
/// `limit`. On failure the partial blob is truncated away.
///
/// # Errors
/// - `VaultFull` if the source pushes the vault past `limit`
/// - `Io` on read or write failure
pub(crate) async fn append_blob<R: AsyncRead + Unpin>(
    container: &ContainerFile,
    key: &VaultKey,
    file_id: FileId,
    source: &mut R,
    chunk_size: usize,
    used: u64,
    limit: u64,
) -> Result<SealedBlob> {
    let mut writer = container.begin_blob().await?;

    match seal_stream(&mut writer, key, file_id, source, chunk_size, used, limit).await {
        Ok((nonce, hash, size)) => {
            let (offset, len) = writer.finish().await?;
            Ok(SealedBlob {
                nonce,
                hash,
                offset,
                len,
                size,
            })
        }
        Err(e) => {
            if let Err(abort_err) = writer.abort().await {
                warn!(file_id = %file_id, error = %abort_err, "Failed to truncate partial blob");
            }
            Err(e)
        }
    }
}

async fn seal_stream<R: AsyncRead + Unpin>(
    writer: &mut BlobWriter,
    key: &VaultKey,
    file_id: FileId,
    source: &mut R,
    chunk_size: usize,
    used: u64,
    limit: u64,
) -> Result<([u8; NONCE_SIZE], Digest256, u64)> {
    let nonce = generate_nonce();
    let aad = *file_id.as_bytes();
    let mut sealer = BlobSealer::new(key, nonce, &aad);
    let mut hasher = CiphertextHasher::new();

    let mut current = Zeroizing::new(vec![0u8; chunk_size]);
    let mut next = Zeroizing::new(vec![0u8; chunk_size]);
    let mut current_len = read_full(source, &mut current[..]).await?;
    let mut size = 0u64;

    loop {
        // A short read means end of input; a full one needs a lookahead to
        // know whether this chunk is the last.
        let next_len = if current_len == chunk_size {
            read_full(source, &mut next[..]).await?
        } else {
            0
        };
        let last = next_len == 0;

        size += current_len as u64;
        if used.saturating_add(size) > limit {
            return Err(Error::VaultFull {
                used,
                requested: size,
                limit,
            });
        }

        let sealed = sealer.seal_chunk(&current[..current_len], last)?;
        hasher.update(&sealed);
        writer.write(&sealed).await?;

        if last {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
    }

    Ok((nonce, hasher.finalize(), size))
}

async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Recompute the digest of a stored blob and compare it to the entry.
///
/// Runs before any decryption so a modified container is reported as
/// tampering rather than a decryption error.
///
/// # Errors
/// - `TamperDetected` if the bytes differ or the range is missing
pub(crate) async fn verify_blob(container: &ContainerFile, entry: &VaultEntry) -> Result<()> {
    let mut reader = match container.open_blob(entry.blob_offset, entry.blob_len).await {
        Ok(reader) => reader,
        Err(Error::CorruptedContainer(_)) => return Err(Error::TamperDetected(entry.id)),
        Err(e) => return Err(e),
    };

    let mut hasher = CiphertextHasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    if total != entry.blob_len || !hasher.finalize().ct_matches(&entry.ciphertext_hash) {
        return Err(Error::TamperDetected(entry.id));
    }
    Ok(())
}

/// Decrypt a blob into `output`.
///
/// Plaintext is written to a temporary file beside `output` and renamed
/// into place only after every chunk authenticated.
pub(crate) async fn export_blob(
    container: &ContainerFile,
    key: &VaultKey,
    entry: &VaultEntry,
    output: &Path,
) -> Result<()> {
    let temp = partial_path(output)?;

    if let Err(e) = decrypt_to(container, key, entry, &temp).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&temp, output).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn decrypt_to(
    container: &ContainerFile,
    key: &VaultKey,
    entry: &VaultEntry,
    target: &Path,
) -> Result<()> {
    if entry.blob_len < TAG_SIZE as u64 {
        return Err(Error::CorruptedContainer(format!(
            "Entry {} has an impossible blob length",
            entry.id
        )));
    }

    let mut reader = container.open_blob(entry.blob_offset, entry.blob_len).await?;
    let mut out = File::create(target).await?;

    let aad = *entry.id.as_bytes();
    let mut opener = BlobOpener::new(key, entry.nonce, &aad);
    let sealed_chunk = entry.chunk_size as u64 + TAG_SIZE as u64;
    let mut buf = vec![0u8; sealed_chunk as usize];
    let mut remaining = entry.blob_len;
    let mut written = 0u64;

    while remaining > 0 {
        let take = remaining.min(sealed_chunk) as usize;
        reader.read_exact(&mut buf[..take]).await?;
        remaining -= take as u64;

        let plain = Zeroizing::new(opener.open_chunk(&buf[..take], remaining == 0)?);
        out.write_all(&plain).await?;
        written += plain.len() as u64;
    }

    if written != entry.size {
        return Err(Error::CorruptedContainer(format!(
            "Entry {} decrypted to {} bytes, expected {}",
            entry.id, written, entry.size
        )));
    }

    out.flush().await?;
    out.sync_all().await?;
    Ok(())
}

fn partial_path(output: &Path) -> Result<PathBuf> {
    let name = output
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("Invalid output path: {}", output.display())))?;
    Ok(output.with_file_name(format!(".{}.partial", name.to_string_lossy())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hiddenvault_container::{FormatVersion, KeySlot, RecoverySlots, VaultHeader};
    use hiddenvault_common::VaultId;
    use hiddenvault_crypto::{KdfParams, Salt};
    use tempfile::TempDir;

    async fn container(dir: &TempDir) -> ContainerFile {
        let now = Utc::now();
        let header = VaultHeader {
            version: FormatVersion::CURRENT,
            vault_id: VaultId::generate(),
            name: "blobs".to_string(),
            salt: Salt::generate(),
            kdf_params: KdfParams::moderate(),
            created_at: now,
            modified_at: now,
            decoy: None,
            password_slot: KeySlot(vec![0; 72]),
            recovery: RecoverySlots::default(),
        };
        ContainerFile::create(&dir.path().join("b.vault"), &header, &[0u8; 64], 0)
            .await
            .unwrap()
    }

    fn entry_for(id: FileId, blob: &SealedBlob, chunk_size: usize) -> VaultEntry {
        VaultEntry {
            id,
            file_name: "f".to_string(),
            original_path: PathBuf::from("f"),
            tags: Vec::new(),
            size: blob.size,
            mime_type: "application/octet-stream".to_string(),
            nonce: blob.nonce,
            ciphertext_hash: blob.hash,
            blob_offset: blob.offset,
            blob_len: blob.len,
            chunk_size: chunk_size as u32,
            created_at: Utc::now(),
            accessed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_verify_export() {
        let dir = TempDir::new().unwrap();
        let container = container(&dir).await;
        let key = VaultKey::generate();
        let id = FileId::generate();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        let blob = append_blob(&container, &key, id, &mut &data[..], 64, 0, u64::MAX)
            .await
            .unwrap();
        assert_eq!(blob.size, 1000);
        assert_eq!(blob.len, hiddenvault_crypto::stream::sealed_len(1000, 64));

        let entry = entry_for(id, &blob, 64);
        verify_blob(&container, &entry).await.unwrap();

        let out = dir.path().join("out.bin");
        export_blob(&container, &key, &entry, &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), data);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let dir = TempDir::new().unwrap();
        let container = container(&dir).await;
        let key = VaultKey::generate();
        let id = FileId::generate();

        let blob = append_blob(&container, &key, id, &mut &b""[..], 64, 0, u64::MAX)
            .await
            .unwrap();
        assert_eq!(blob.len, TAG_SIZE as u64);

        let out = dir.path().join("empty");
        export_blob(&container, &key, &entry_for(id, &blob, 64), &out)
            .await
            .unwrap();
        assert!(std::fs::read(&out).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_size_limit_truncates_blob() {
        let dir = TempDir::new().unwrap();
        let container = container(&dir).await;
        let key = VaultKey::generate();

        let result = append_blob(
            &container,
            &key,
            FileId::generate(),
            &mut &[1u8; 200][..],
            64,
            50,
            150,
        )
        .await;

        assert!(matches!(result, Err(Error::VaultFull { .. })));
        assert_eq!(container.blob_region_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flipped_byte_is_tamper() {
        let dir = TempDir::new().unwrap();
        let container = container(&dir).await;
        let key = VaultKey::generate();
        let id = FileId::generate();
        let blob = append_blob(&container, &key, id, &mut &b"hello-world"[..], 64, 0, u64::MAX)
            .await
            .unwrap();

        let path = container.path().to_path_buf();
        let mut bytes = std::fs::read(&path).unwrap();
        let pos = (container.layout().blob_region_start() + blob.offset + 3) as usize;
        bytes[pos] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();

        let entry = entry_for(id, &blob, 64);
        assert!(matches!(
            verify_blob(&container, &entry).await,
            Err(Error::TamperDetected(t)) if t == id
        ));
    }

    #[tokio::test]
    async fn test_missing_range_is_tamper() {
        let dir = TempDir::new().unwrap();
        let container = container(&dir).await;
        let key = VaultKey::generate();
        let id = FileId::generate();
        let blob = append_blob(&container, &key, id, &mut &b"data"[..], 64, 0, u64::MAX)
            .await
            .unwrap();
        container.truncate_blobs(2).await.unwrap();

        assert!(matches!(
            verify_blob(&container, &entry_for(id, &blob, 64)).await,
            Err(Error::TamperDetected(_))
        ));
    }
}
