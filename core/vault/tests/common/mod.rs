#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use hiddenvault_crypto::KdfParams;
use hiddenvault_vault::{VaultManager, VaultSettings};

pub const PASSWORD: &[u8] = b"Sup3rSecret!2025";

/// Settings with a cheap KDF so tests stay fast.
pub fn fast_settings() -> VaultSettings {
    VaultSettings {
        kdf: KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        },
        auto_lock: Duration::from_secs(60),
        ..VaultSettings::default()
    }
}

pub fn manager() -> VaultManager {
    VaultManager::new(fast_settings()).unwrap()
}

pub fn manager_with(settings: VaultSettings) -> VaultManager {
    VaultManager::new(settings).unwrap()
}

pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
