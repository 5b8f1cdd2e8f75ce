//! Byte layout of the container prefix.
//!
//! Everything here is pure: parsing and encoding operate on byte slices and
//! never touch the filesystem.

use hiddenvault_common::{Error, Result};
use hiddenvault_crypto::{NONCE_SIZE, TAG_SIZE};

use crate::header::VaultHeader;

/// Literal separating the plaintext header from the manifest region.
pub const BOUNDARY: &[u8] = b"\n---HIDDEN_VAULT_BOUNDARY---\n";

/// `active_slot: u64` + `capacity: u64` + `slot_len: [u64; 2]`.
pub const REGION_PREFIX_LEN: u64 = 32;

/// Upper bound on header size; the boundary must appear before this.
pub const MAX_HEADER_LEN: usize = 1024 * 1024;

/// Smallest manifest capacity ever reserved.
pub const MIN_MANIFEST_CAPACITY: u64 = 4 * 1024;

/// Parsed location of every region in a container.
///
/// The manifest region holds two slots of `manifest_capacity` bytes each.
/// Only `active_slot` is read; a new manifest goes into the other slot and
/// becomes current once the selector is flipped.
#[derive(Debug, Clone)]
pub struct ContainerLayout {
    pub header: VaultHeader,
    /// Length of the header JSON in bytes.
    pub header_len: u64,
    /// Slot holding the current manifest, 0 or 1.
    pub active_slot: usize,
    /// Sealed length stored in each slot.
    pub slot_lens: [u64; 2],
    /// Bytes reserved per slot.
    pub manifest_capacity: u64,
}

impl ContainerLayout {
    /// Offset of the `active_slot` selector.
    pub fn region_offset(&self) -> u64 {
        self.header_len + BOUNDARY.len() as u64
    }

    /// Offset of the length field of `slot`.
    pub fn slot_len_offset(&self, slot: usize) -> u64 {
        self.region_offset() + 16 + 8 * slot as u64
    }

    /// Offset of the first byte of `slot`.
    pub fn slot_offset(&self, slot: usize) -> u64 {
        self.region_offset() + REGION_PREFIX_LEN + self.manifest_capacity * slot as u64
    }

    /// Length of the current sealed manifest.
    pub fn manifest_len(&self) -> u64 {
        self.slot_lens[self.active_slot]
    }

    /// Offset of the first byte of the current sealed manifest.
    pub fn manifest_offset(&self) -> u64 {
        self.slot_offset(self.active_slot)
    }

    /// Offset of the first blob byte. Blob positions are relative to this.
    pub fn blob_region_start(&self) -> u64 {
        self.slot_offset(2)
    }
}

/// Find the start of the boundary marker.
pub fn find_boundary(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(BOUNDARY.len())
        .position(|window| window == BOUNDARY)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Parse header and region prefix from the beginning of a container.
///
/// `bytes` must contain at least the header, the boundary, and the region
/// prefix.
///
/// # Errors
/// - `CorruptedContainer` if the boundary is missing, the header does not
///   parse, or the region prefix is inconsistent
pub fn parse_prefix(bytes: &[u8]) -> Result<ContainerLayout> {
    let boundary_pos = find_boundary(bytes)
        .ok_or_else(|| Error::CorruptedContainer("Boundary marker not found".to_string()))?;

    let header = VaultHeader::from_bytes(&bytes[..boundary_pos])?;

    let region_start = boundary_pos + BOUNDARY.len();
    let region = bytes
        .get(region_start..region_start + REGION_PREFIX_LEN as usize)
        .ok_or_else(|| Error::CorruptedContainer("Manifest region truncated".to_string()))?;

    let active_slot = match read_u64(region, 0) {
        0 => 0,
        1 => 1,
        other => {
            return Err(Error::CorruptedContainer(format!(
                "Invalid manifest slot selector {}",
                other
            )))
        }
    };
    let manifest_capacity = read_u64(region, 8);
    let slot_lens = [read_u64(region, 16), read_u64(region, 24)];

    // Both slots and the prefix must be addressable.
    (region_start as u64)
        .checked_add(REGION_PREFIX_LEN)
        .and_then(|end| {
            manifest_capacity
                .checked_mul(2)
                .and_then(|slots| end.checked_add(slots))
        })
        .ok_or_else(|| {
            Error::CorruptedContainer("Manifest capacity out of range".to_string())
        })?;

    if slot_lens.iter().any(|len| *len > manifest_capacity) {
        return Err(Error::CorruptedContainer(
            "Manifest length exceeds reserved capacity".to_string(),
        ));
    }
    if slot_lens[active_slot] < (NONCE_SIZE + TAG_SIZE) as u64 {
        return Err(Error::CorruptedContainer("Manifest too short".to_string()));
    }

    Ok(ContainerLayout {
        header,
        header_len: boundary_pos as u64,
        active_slot,
        slot_lens,
        manifest_capacity,
    })
}

/// Encode `header || boundary || region prefix` with the manifest in slot 0.
pub fn encode_prefix(header_bytes: &[u8], manifest_len: u64, capacity: u64) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(header_bytes.len() + BOUNDARY.len() + REGION_PREFIX_LEN as usize);
    out.extend_from_slice(header_bytes);
    out.extend_from_slice(BOUNDARY);
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&capacity.to_le_bytes());
    out.extend_from_slice(&manifest_len.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out
}

/// Capacity to reserve for a manifest of `sealed_len` bytes, leaving room
/// to grow before the next full rewrite.
pub fn capacity_for(sealed_len: u64, minimum: u64) -> u64 {
    let doubled = sealed_len.saturating_mul(2).max(1);
    doubled
        .checked_next_power_of_two()
        .unwrap_or(doubled)
        .max(minimum)
        .max(MIN_MANIFEST_CAPACITY)
}
