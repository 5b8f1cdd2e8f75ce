//! Common utilities and types shared across Hidden Vault modules.
//!
//! This module provides foundational types that are used throughout the codebase,
//! ensuring consistency and type safety.

pub mod error;
pub mod mime;
pub mod types;

pub use error::{Error, Result};
pub use mime::guess_mime_type;
pub use types::{FileId, VaultId};
