//! Local content scanner for Hidden Vault.
//!
//! Proposes files that look sensitive so they can be moved into a vault:
//! - Content matchers (ID numbers, card numbers, IBANs, private keys, secrets)
//! - File-type indicators from extension or name
//! - Risk ranking of the results
//!
//! The scanner never touches vault keys or sessions; all analysis is local.

pub mod config;
pub mod rules;
pub mod scanner;

pub use config::ScannerConfig;
pub use rules::{Category, RiskLevel};
pub use scanner::{ContentScanner, SensitiveFileCandidate};
