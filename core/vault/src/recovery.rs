//! Recovery code issuance and verification.
//!
//! Each issued code wraps the vault key in its own header slot. A code is
//! accepted only if it unwraps a slot *and* the unwrapped key re-derives
//! that exact code for the slot's index and the current generation, so
//! codes from a previous generation stop working once slots are replaced.

use zeroize::{Zeroize, ZeroizeOnDrop};

use hiddenvault_common::{Error, Result};
use hiddenvault_container::{KeySlot, RecoverySlots, VaultHeader};
use hiddenvault_crypto::{RecoveryCode, Salt, VaultKey};

/// Codes shown to the user once, right after issuance.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RecoveryCodes {
    #[zeroize(skip)]
    generation: u32,
    phrases: Vec<String>,
}

impl RecoveryCodes {
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

impl std::fmt::Debug for RecoveryCodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RecoveryCodes(generation {}, [REDACTED; {}])",
            self.generation,
            self.phrases.len()
        )
    }
}

/// Issue `count` codes for `generation` and the slots that go with them.
pub fn issue(
    vault_key: &VaultKey,
    salt: &Salt,
    generation: u32,
    count: u32,
) -> Result<(RecoverySlots, RecoveryCodes)> {
    let mut slots = Vec::with_capacity(count as usize);
    let mut phrases = Vec::with_capacity(count as usize);

    for code in RecoveryCode::derive_set(vault_key, salt, generation, count) {
        let kek = code.recovery_key(salt);
        slots.push(KeySlot(vault_key.wrap(kek.as_bytes())?));
        phrases.push(code.to_phrase()?);
    }

    Ok((
        RecoverySlots { generation, slots },
        RecoveryCodes {
            generation,
            phrases,
        },
    ))
}

/// Unwrap the vault key with a recovery code.
///
/// # Errors
/// - `RecoveryCodeInvalid` if no slot accepts the code
pub fn unwrap_with_code(header: &VaultHeader, code: &RecoveryCode) -> Result<VaultKey> {
    let kek = code.recovery_key(&header.salt);
    let generation = header.recovery.generation;

    for (index, slot) in header.recovery.slots.iter().enumerate() {
        let Ok(vault_key) = VaultKey::unwrap_from(kek.as_bytes(), slot.as_bytes()) else {
            continue;
        };
        let expected = RecoveryCode::derive(&vault_key, &header.salt, generation, index as u32);
        if expected.ct_matches(code) {
            return Ok(vault_key);
        }
    }
    Err(Error::RecoveryCodeInvalid)
}

/// Parse a typed phrase and unwrap the vault key with it.
pub fn unwrap_with_phrase(header: &VaultHeader, phrase: &str) -> Result<VaultKey> {
    let code = RecoveryCode::parse(phrase)?;
    unwrap_with_code(header, &code)
}
