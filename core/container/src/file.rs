//! Async file access to a vault container.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, Take};
use tracing::debug;

use crate::header::VaultHeader;
use crate::layout::{
    capacity_for, encode_prefix, find_boundary, parse_prefix, ContainerLayout, BOUNDARY,
    MAX_HEADER_LEN, REGION_PREFIX_LEN,
};
use hiddenvault_common::{Error, Result};

const ZEROS: [u8; 8192] = [0u8; 8192];

/// Which blob bytes to carry over during a full rewrite.
#[derive(Debug, Clone)]
pub enum BlobCopy {
    /// Copy the entire blob region verbatim; offsets stay valid.
    All,
    /// Copy only these `(offset, len)` ranges, packed back to back in the
    /// given order. The caller must have re-pointed its entries to the
    /// packed offsets (see [`packed_offsets`]).
    Ranges(Vec<(u64, u64)>),
}

/// Offsets each range will occupy after a [`BlobCopy::Ranges`] rewrite.
pub fn packed_offsets(ranges: &[(u64, u64)]) -> Vec<u64> {
    let mut next = 0u64;
    ranges
        .iter()
        .map(|(_, len)| {
            let offset = next;
            next += len;
            offset
        })
        .collect()
}

/// Handle to a container file on disk.
///
/// Caches the parsed layout; every write updates it. Callers are expected
/// to serialize writers (one session per vault).
#[derive(Debug)]
pub struct ContainerFile {
    path: PathBuf,
    layout: ContainerLayout,
}

impl ContainerFile {
    /// Create a new container.
    ///
    /// # Errors
    /// - `AlreadyExists` if a file is already present at `path`
    pub async fn create(
        path: &Path,
        header: &VaultHeader,
        sealed_manifest: &[u8],
        min_capacity: u64,
    ) -> Result<Self> {
        if fs::try_exists(path).await? {
            return Err(Error::AlreadyExists(format!(
                "Vault already exists at {}",
                path.display()
            )));
        }

        let tmp = temp_path(path);
        let layout = match write_container(&tmp, header, sealed_manifest, min_capacity, None).await
        {
            Ok(layout) => layout,
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(e);
            }
        };
        fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), "Container created");
        Ok(Self {
            path: path.to_path_buf(),
            layout,
        })
    }

    /// Open an existing container and parse its header without any key.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    /// - `CorruptedContainer` if the layout is invalid
    pub async fn open(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await? {
            return Err(Error::NotFound(format!("Vault file not found: {}", path.display())));
        }

        let mut file = File::open(path).await?;
        let prefix = read_prefix(&mut file).await?;
        let layout = parse_prefix(&prefix)?;

        let file_len = file.metadata().await?.len();
        if file_len < layout.blob_region_start() {
            return Err(Error::CorruptedContainer(
                "Container shorter than its manifest region".to_string(),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            layout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &ContainerLayout {
        &self.layout
    }

    pub fn header(&self) -> &VaultHeader {
        &self.layout.header
    }

    /// Read the sealed manifest bytes.
    pub async fn read_manifest(&self) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.layout.manifest_offset()))
            .await?;

        let mut sealed = vec![0u8; self.layout.manifest_len() as usize];
        file.read_exact(&mut sealed).await.map_err(|e| {
            Error::CorruptedContainer(format!("Manifest region unreadable: {}", e))
        })?;
        Ok(sealed)
    }

    /// Persist a new sealed manifest.
    ///
    /// When it fits the reserved capacity it goes into the inactive slot,
    /// which is synced before the selector is flipped; a crash at any point
    /// leaves either the old or the new manifest current. Otherwise the
    /// whole container is rewritten with a larger reservation. Blob offsets
    /// are unaffected either way.
    pub async fn write_manifest(&mut self, sealed: &[u8], min_capacity: u64) -> Result<()> {
        let new_len = sealed.len() as u64;
        if new_len > self.layout.manifest_capacity {
            debug!(
                path = %self.path.display(),
                needed = new_len,
                capacity = self.layout.manifest_capacity,
                "Manifest outgrew its region, rewriting container"
            );
            let header = self.layout.header.clone();
            return self
                .rewrite(&header, sealed, min_capacity, BlobCopy::All)
                .await;
        }

        let slot = self.write_standby(sealed).await?;
        self.commit_slot(slot).await
    }

    /// Write `sealed` into the inactive slot without making it current.
    async fn write_standby(&mut self, sealed: &[u8]) -> Result<usize> {
        let slot = 1 - self.layout.active_slot;
        let new_len = sealed.len() as u64;

        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(self.layout.slot_offset(slot)))
            .await?;
        file.write_all(sealed).await?;

        // Scrub the tail of whatever this slot held before.
        let stale = self.layout.slot_lens[slot].saturating_sub(new_len);
        write_zeros(&mut file, stale).await?;

        file.seek(SeekFrom::Start(self.layout.slot_len_offset(slot)))
            .await?;
        file.write_all(&new_len.to_le_bytes()).await?;
        file.sync_data().await?;

        self.layout.slot_lens[slot] = new_len;
        Ok(slot)
    }

    /// Make `slot` the current manifest.
    async fn commit_slot(&mut self, slot: usize) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(self.layout.region_offset()))
            .await?;
        file.write_all(&(slot as u64).to_le_bytes()).await?;
        file.sync_data().await?;

        self.layout.active_slot = slot;
        Ok(())
    }

    /// Rewrite the whole container with a new header and manifest.
    ///
    /// The new file is written next to the old one and atomically renamed
    /// over it, so a failure leaves the original untouched.
    pub async fn rewrite(
        &mut self,
        header: &VaultHeader,
        sealed: &[u8],
        min_capacity: u64,
        blobs: BlobCopy,
    ) -> Result<()> {
        let tmp = temp_path(&self.path);
        let source = Some((&self.path as &Path, self.layout.blob_region_start(), blobs));

        let layout = match write_container(&tmp, header, sealed, min_capacity, source).await {
            Ok(layout) => layout,
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(e);
            }
        };
        fs::rename(&tmp, &self.path).await?;

        debug!(
            path = %self.path.display(),
            capacity = layout.manifest_capacity,
            "Container rewritten"
        );
        self.layout = layout;
        Ok(())
    }

    /// Start appending a blob at end-of-file.
    pub async fn begin_blob(&self) -> Result<BlobWriter> {
        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        let end = file.seek(SeekFrom::End(0)).await?;
        let region_start = self.layout.blob_region_start();
        if end < region_start {
            return Err(Error::CorruptedContainer(
                "Container shorter than its manifest region".to_string(),
            ));
        }

        Ok(BlobWriter {
            file,
            start: end,
            region_start,
            written: 0,
        })
    }

    /// Open a bounded reader over one blob.
    ///
    /// # Errors
    /// - `CorruptedContainer` if the range lies outside the file
    pub async fn open_blob(&self, offset: u64, len: u64) -> Result<Take<File>> {
        let start = self
            .layout
            .blob_region_start()
            .checked_add(offset)
            .ok_or_else(|| Error::CorruptedContainer("Blob offset overflow".to_string()))?;
        let end = start
            .checked_add(len)
            .ok_or_else(|| Error::CorruptedContainer("Blob length overflow".to_string()))?;

        let mut file = File::open(&self.path).await?;
        if end > file.metadata().await?.len() {
            return Err(Error::CorruptedContainer(
                "Blob range beyond end of container".to_string(),
            ));
        }

        file.seek(SeekFrom::Start(start)).await?;
        Ok(file.take(len))
    }

    /// Size of the blob region, including orphaned bytes.
    pub async fn blob_region_len(&self) -> Result<u64> {
        let len = fs::metadata(&self.path).await?.len();
        Ok(len.saturating_sub(self.layout.blob_region_start()))
    }

    /// Drop everything after `offset` in the blob region.
    pub async fn truncate_blobs(&self, offset: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path).await?;
        file.set_len(self.layout.blob_region_start() + offset)
            .await?;
        file.sync_data().await?;
        Ok(())
    }
}

/// Streaming writer for one appended blob.
pub struct BlobWriter {
    file: File,
    start: u64,
    region_start: u64,
    written: u64,
}

impl BlobWriter {
    /// Offset of this blob relative to the blob region.
    pub fn offset(&self) -> u64 {
        self.start - self.region_start
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Flush to disk and return `(offset, len)`.
    pub async fn finish(mut self) -> Result<(u64, u64)> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok((self.start - self.region_start, self.written))
    }

    /// Remove whatever was written so far.
    pub async fn abort(self) -> Result<()> {
        self.file.set_len(self.start).await?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vault".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

async fn read_prefix(file: &mut File) -> Result<Vec<u8>> {
    let limit = MAX_HEADER_LEN + BOUNDARY.len() + REGION_PREFIX_LEN as usize;
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 8192];

    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find_boundary(&buf) {
            if buf.len() >= pos + BOUNDARY.len() + REGION_PREFIX_LEN as usize {
                break;
            }
        }
        if buf.len() >= limit {
            break;
        }
    }
    Ok(buf)
}

async fn write_zeros(file: &mut File, mut count: u64) -> Result<()> {
    while count > 0 {
        let n = count.min(ZEROS.len() as u64) as usize;
        file.write_all(&ZEROS[..n]).await?;
        count -= n as u64;
    }
    Ok(())
}

async fn write_container(
    target: &Path,
    header: &VaultHeader,
    sealed: &[u8],
    min_capacity: u64,
    source: Option<(&Path, u64, BlobCopy)>,
) -> Result<ContainerLayout> {
    let header_bytes = header.to_bytes()?;
    let capacity = capacity_for(sealed.len() as u64, min_capacity);

    let mut out = File::create(target).await?;
    out.write_all(&encode_prefix(&header_bytes, sealed.len() as u64, capacity))
        .await?;
    out.write_all(sealed).await?;
    write_zeros(&mut out, 2 * capacity - sealed.len() as u64).await?;

    if let Some((source_path, region_start, blobs)) = source {
        let mut src = File::open(source_path).await?;
        match blobs {
            BlobCopy::All => {
                src.seek(SeekFrom::Start(region_start)).await?;
                tokio::io::copy(&mut src, &mut out).await?;
            }
            BlobCopy::Ranges(ranges) => {
                for (offset, len) in ranges {
                    src.seek(SeekFrom::Start(region_start + offset)).await?;
                    let copied = tokio::io::copy(&mut (&mut src).take(len), &mut out).await?;
                    if copied != len {
                        return Err(Error::CorruptedContainer(
                            "Blob range beyond end of container".to_string(),
                        ));
                    }
                }
            }
        }
    }

    out.flush().await?;
    out.sync_all().await?;

    Ok(ContainerLayout {
        header: header.clone(),
        header_len: header_bytes.len() as u64,
        active_slot: 0,
        slot_lens: [sealed.len() as u64, 0],
        manifest_capacity: capacity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::tests::sample_header;
    use tempfile::TempDir;

    fn sealed(len: usize, fill: u8) -> Vec<u8> {
        vec![fill; len]
    }

    async fn append(container: &ContainerFile, bytes: &[u8]) -> (u64, u64) {
        let mut writer = container.begin_blob().await.unwrap();
        writer.write(bytes).await.unwrap();
        writer.finish().await.unwrap()
    }

    async fn read_blob(container: &ContainerFile, offset: u64, len: u64) -> Vec<u8> {
        let mut reader = container.open_blob(offset, len).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_create_and_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.vault");
        let header = sample_header();

        ContainerFile::create(&path, &header, &sealed(100, 7), 0)
            .await
            .unwrap();

        let opened = ContainerFile::open(&path).await.unwrap();
        assert_eq!(opened.header().vault_id, header.vault_id);
        assert_eq!(opened.read_manifest().await.unwrap(), sealed(100, 7));
        assert_eq!(opened.blob_region_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_refuses_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.vault");
        std::fs::write(&path, b"occupied").unwrap();

        let result = ContainerFile::create(&path, &sample_header(), &sealed(64, 1), 0).await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_append_and_read_blobs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.vault");
        let container = ContainerFile::create(&path, &sample_header(), &sealed(64, 1), 0)
            .await
            .unwrap();

        let (off_a, len_a) = append(&container, b"first blob").await;
        let (off_b, len_b) = append(&container, b"second").await;

        assert_eq!(off_a, 0);
        assert_eq!(off_b, len_a);
        assert_eq!(read_blob(&container, off_a, len_a).await, b"first blob");
        assert_eq!(read_blob(&container, off_b, len_b).await, b"second");
    }

    #[tokio::test]
    async fn test_manifest_in_place_keeps_blobs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.vault");
        let mut container = ContainerFile::create(&path, &sample_header(), &sealed(200, 1), 0)
            .await
            .unwrap();
        let (off, len) = append(&container, b"payload").await;
        let region_start = container.layout().blob_region_start();

        container.write_manifest(&sealed(80, 2), 0).await.unwrap();
        assert_eq!(container.layout().blob_region_start(), region_start);

        let reopened = ContainerFile::open(&path).await.unwrap();
        assert_eq!(reopened.read_manifest().await.unwrap(), sealed(80, 2));
        assert_eq!(read_blob(&reopened, off, len).await, b"payload");
    }

    #[tokio::test]
    async fn test_manifest_writes_alternate_slots() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.vault");
        let mut container = ContainerFile::create(&path, &sample_header(), &sealed(200, 1), 0)
            .await
            .unwrap();
        assert_eq!(container.layout().active_slot, 0);

        container.write_manifest(&sealed(90, 2), 0).await.unwrap();
        assert_eq!(container.layout().active_slot, 1);
        container.write_manifest(&sealed(70, 3), 0).await.unwrap();
        assert_eq!(container.layout().active_slot, 0);

        let reopened = ContainerFile::open(&path).await.unwrap();
        assert_eq!(reopened.layout().active_slot, 0);
        assert_eq!(reopened.layout().slot_lens, [70, 90]);
        assert_eq!(reopened.read_manifest().await.unwrap(), sealed(70, 3));

        // The shorter rewrite of slot 0 left no bytes of the first manifest.
        let bytes = std::fs::read(&path).unwrap();
        let slot0 = reopened.layout().slot_offset(0) as usize;
        assert!(bytes[slot0 + 70..slot0 + 200].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_uncommitted_manifest_leaves_previous_current() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.vault");
        let mut container = ContainerFile::create(&path, &sample_header(), &sealed(120, 1), 0)
            .await
            .unwrap();
        let (off, len) = append(&container, b"payload").await;

        // Interrupted before the selector flip.
        container.write_standby(&sealed(300, 9)).await.unwrap();

        let reopened = ContainerFile::open(&path).await.unwrap();
        assert_eq!(reopened.layout().active_slot, 0);
        assert_eq!(reopened.read_manifest().await.unwrap(), sealed(120, 1));
        assert_eq!(read_blob(&reopened, off, len).await, b"payload");

        // A torn standby slot is never read.
        let mut bytes = std::fs::read(&path).unwrap();
        let slot1 = reopened.layout().slot_offset(1) as usize;
        bytes[slot1..slot1 + 150].fill(0xAB);
        std::fs::write(&path, &bytes).unwrap();
        let reopened = ContainerFile::open(&path).await.unwrap();
        assert_eq!(reopened.read_manifest().await.unwrap(), sealed(120, 1));
    }

    #[tokio::test]
    async fn test_manifest_growth_rewrites_and_preserves_offsets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.vault");
        let mut container = ContainerFile::create(&path, &sample_header(), &sealed(64, 1), 0)
            .await
            .unwrap();
        let old_capacity = container.layout().manifest_capacity;
        let (off, len) = append(&container, b"stays readable").await;

        let big = sealed(old_capacity as usize + 10, 3);
        container.write_manifest(&big, 0).await.unwrap();
        assert!(container.layout().manifest_capacity > old_capacity);

        let reopened = ContainerFile::open(&path).await.unwrap();
        assert_eq!(reopened.read_manifest().await.unwrap(), big);
        assert_eq!(read_blob(&reopened, off, len).await, b"stays readable");
    }

    #[tokio::test]
    async fn test_rewrite_with_ranges_compacts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.vault");
        let mut container = ContainerFile::create(&path, &sample_header(), &sealed(64, 1), 0)
            .await
            .unwrap();
        let a = append(&container, b"aaaa").await;
        let _orphan = append(&container, b"orphaned bytes").await;
        let c = append(&container, b"cc").await;

        let ranges = vec![a, c];
        let offsets = packed_offsets(&ranges);
        assert_eq!(offsets, vec![0, 4]);

        let header = container.header().clone();
        container
            .rewrite(&header, &sealed(64, 1), 0, BlobCopy::Ranges(ranges))
            .await
            .unwrap();

        assert_eq!(container.blob_region_len().await.unwrap(), 6);
        assert_eq!(read_blob(&container, 0, 4).await, b"aaaa");
        assert_eq!(read_blob(&container, 4, 2).await, b"cc");
    }

    #[tokio::test]
    async fn test_out_of_range_blob_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.vault");
        let container = ContainerFile::create(&path, &sample_header(), &sealed(64, 1), 0)
            .await
            .unwrap();
        append(&container, b"short").await;

        assert!(matches!(
            container.open_blob(0, 1000).await,
            Err(Error::CorruptedContainer(_))
        ));
    }

    #[tokio::test]
    async fn test_abort_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.vault");
        let container = ContainerFile::create(&path, &sample_header(), &sealed(64, 1), 0)
            .await
            .unwrap();

        let mut writer = container.begin_blob().await.unwrap();
        writer.write(b"partial").await.unwrap();
        writer.abort().await.unwrap();

        assert_eq!(container.blob_region_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_missing_boundary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.vault");
        std::fs::write(&path, b"{\"version\":1}").unwrap();

        assert!(matches!(
            ContainerFile::open(&path).await,
            Err(Error::CorruptedContainer(_))
        ));
    }
}
