//! Scanner configuration.

use serde::{Deserialize, Serialize};

/// Limits applied while scanning a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Files larger than this are classified by name only.
    pub max_file_size: u64,
    /// Bytes read from the start of a file for content matching.
    pub prefix_bytes: usize,
    /// Directory depth to descend; 1 means immediate children only.
    pub max_depth: usize,
    /// Follow symbolic links while walking.
    pub follow_links: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            prefix_bytes: 1024 * 1024,
            max_depth: 1,
            follow_links: false,
        }
    }
}
