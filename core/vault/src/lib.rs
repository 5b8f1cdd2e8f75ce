//! Vault engine for Hidden Vault.
//!
//! This module provides:
//! - Vault creation, unlocking and locking
//! - Streamed, encrypted import and export of files
//! - The encrypted manifest with its audit log
//! - Session handling with auto-lock and secure key management
//! - Password recovery codes and decoy vaults
//!
//! # Architecture
//! [`VaultManager`] is the only entry point. It owns a registry of live
//! [`VaultSession`]s keyed by vault id; every operation resolves the
//! session, works under its lock, and persists the manifest before
//! returning.

mod autolock;
mod blob;
pub mod manager;
pub mod manifest;
pub mod recovery;
pub mod session;
pub mod settings;

pub use manager::{VaultManager, VaultSummary, DECOY_SUFFIX};
pub use manifest::{AuditAction, AuditEvent, AuditOutcome, EntryPage, VaultEntry, VaultManifest};
pub use recovery::RecoveryCodes;
pub use session::{SessionState, VaultSession};
pub use settings::VaultSettings;
