//! Stable file identities used to deduplicate across scans and restarts.

use std::fmt;
use std::fmt::Write as _;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Dedup key derived from a file's path, size, and modification time.
///
/// Two observations of the same on-disk file yield the same identity; a file
/// rewritten in place (new size or mtime) becomes a fresh candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileIdentity(String);

impl FileIdentity {
    pub fn derive(path: &Path, size: u64, modified: SystemTime) -> Self {
        let mtime_secs = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(size.to_le_bytes());
        hasher.update(mtime_secs.to_le_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(32);
        for byte in &digest[..16] {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Derive the identity by stat-ing `path`.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        Ok(Self::derive(path, meta.len(), modified))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
