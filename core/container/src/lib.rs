//! On-disk container format for Hidden Vault.
//!
//! A vault is a single file:
//!
//! ```text
//! [header JSON][\n---HIDDEN_VAULT_BOUNDARY---\n]
//! [sealed_len: u64 LE][capacity: u64 LE][sealed manifest][zero padding to capacity]
//! [blob 0][blob 1]...
//! ```
//!
//! The header is plaintext and parsed without any key. The manifest region
//! reserves spare capacity so most manifest updates are written in place.
//! Blobs are appended at end-of-file; their offsets (relative to the start
//! of the blob region) live only in the encrypted manifest.
//!
//! # Design Principles
//! - The container knows nothing about manifest contents or keys
//! - Full rewrites go through a sibling temp file and an atomic rename
//! - Reads of blob ranges are bounded by the recorded length

pub mod file;
pub mod header;
pub mod layout;

pub use file::{packed_offsets, BlobCopy, BlobWriter, ContainerFile};
pub use header::{DecoyLink, FormatVersion, KeySlot, RecoverySlots, VaultHeader};
pub use layout::{ContainerLayout, BOUNDARY};
