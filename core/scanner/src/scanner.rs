//! Directory scanning and ranking.

use std::cmp::Reverse;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::ScannerConfig;
use crate::rules::{is_text_extension, name_indicators, Category, ContentRules, RiskLevel};
use hiddenvault_common::{guess_mime_type, Error, Result};

/// A file proposed for import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveFileCandidate {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub risk: RiskLevel,
    pub categories: Vec<Category>,
    pub mime_type: String,
}

/// Regex-based detector for sensitive files.
pub struct ContentScanner {
    config: ScannerConfig,
    rules: ContentRules,
}

impl ContentScanner {
    /// Create a scanner with the given limits.
    ///
    /// # Errors
    /// - `InvalidInput` if `max_depth` is zero or a pattern fails to compile
    pub fn new(config: ScannerConfig) -> Result<Self> {
        if config.max_depth == 0 {
            return Err(Error::InvalidInput(
                "Scanner max_depth must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            config,
            rules: ContentRules::new()?,
        })
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Scan a directory and return ranked candidates.
    ///
    /// # Preconditions
    /// - `directory` must be a directory
    ///
    /// # Postconditions
    /// - Only files with at least one detection are returned
    /// - Sorted by risk (high first), then category count, then path
    ///
    /// # Errors
    /// - `InvalidInput` if `directory` is not a directory
    pub fn scan_directory(&self, directory: &Path) -> Result<Vec<SensitiveFileCandidate>> {
        if !directory.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Not a directory: {}",
                directory.display()
            )));
        }

        let mut results = Vec::new();
        let walker = WalkDir::new(directory)
            .min_depth(1)
            .max_depth(self.config.max_depth)
            .follow_links(self.config.follow_links);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(candidate) = self.scan_file(entry.path()) {
                results.push(candidate);
            }
        }

        rank(&mut results);
        debug!(
            directory = %directory.display(),
            candidates = results.len(),
            "Scan complete"
        );
        Ok(results)
    }

    /// Classify one file. Returns `None` if nothing was detected or the
    /// file could not be read.
    pub fn scan_file(&self, path: &Path) -> Option<SensitiveFileCandidate> {
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable file");
                return None;
            }
        };

        let mut categories = name_indicators(path);

        if size <= self.config.max_file_size {
            match self.read_prefix(path) {
                Ok(prefix) => {
                    if is_text_extension(path) || !prefix.contains(&0) {
                        let text = String::from_utf8_lossy(&prefix);
                        categories.extend(self.rules.matches(&text));
                    }
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable file");
                    return None;
                }
            }
        }

        categories.sort();
        categories.dedup();
        let risk = categories.iter().map(Category::risk).max()?;

        Some(SensitiveFileCandidate {
            path: path.to_path_buf(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size,
            risk,
            categories,
            mime_type: guess_mime_type(path).to_string(),
        })
    }

    fn read_prefix(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        File::open(path)?
            .take(self.config.prefix_bytes as u64)
            .read_to_end(&mut buf)?;
        Ok(buf)
    }
}

fn rank(results: &mut [SensitiveFileCandidate]) {
    results.sort_by(|a, b| {
        (Reverse(a.risk), Reverse(a.categories.len()), &a.path).cmp(&(
            Reverse(b.risk),
            Reverse(b.categories.len()),
            &b.path,
        ))
    });
}
