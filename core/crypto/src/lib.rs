//! Cryptographic primitives for Hidden Vault.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Secure key management with automatic zeroization
//! - Chunked blob sealing for large files
//! - BLAKE2b ciphertext digests for tamper detection
//! - Recovery codes that unwrap the vault key
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons

pub mod aead;
pub mod digest;
pub mod kdf;
pub mod keys;
pub mod recovery;
pub mod stream;

pub use aead::{decrypt, encrypt, generate_nonce, NONCE_SIZE, TAG_SIZE};
pub use digest::{CiphertextHasher, Digest256};
pub use kdf::{derive_key, KdfParams};
pub use keys::{PasswordKey, RecoveryKey, Salt, VaultKey, KEY_LENGTH, SALT_LENGTH};
pub use recovery::RecoveryCode;
pub use stream::{BlobOpener, BlobSealer, DEFAULT_CHUNK_SIZE};
