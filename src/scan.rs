//! Volume scanning and candidate classification.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use walkdir::{DirEntry, WalkDir};

use crate::identity::FileIdentity;

/// Per-file upload lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Unknown,
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

/// One discovered file with its dedup identity.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub identity: FileIdentity,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub state: FileState,
    pub discovered_at: SystemTime,
}

impl FileRecord {
    #[must_use]
    pub fn observation(&self) -> Observation {
        Observation {
            size: self.size,
            modified: self.modified,
        }
    }
}

/// A point-in-time (size, mtime) reading used by the write-stability check:
/// a file is only admitted as a genuine candidate after two identical
/// observations separated by a quiet interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub size: u64,
    pub modified: SystemTime,
}

impl Observation {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            size: meta.len(),
            modified: meta.modified().unwrap_or(UNIX_EPOCH),
        })
    }
}

/// Extensions accepted by default: the camera image formats plus the video
/// containers the uploader handles.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "mp4", "mov", "avi", "wmv", "mkv",
];

/// Return `true` if `path` has an allowed media extension.
#[must_use]
pub fn is_supported_media(path: &Path, exts: Option<&[String]>) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            match exts {
                Some(exts) => exts.iter().any(|e| *e == ext),
                None => DEFAULT_EXTENSIONS.contains(&ext.as_str()),
            }
        })
}

/// Lazily enumerate candidate media files under `root`.
///
/// A missing or unmounted root yields an empty sequence; "no volume" is a
/// status, not an error. Entries that vanish between listing and stat are
/// skipped silently.
pub fn discover<'a>(
    root: &Path,
    exts: Option<&'a [String]>,
) -> impl Iterator<Item = FileRecord> + 'a {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !should_skip_dir(e))
        .flatten()
        .filter_map(move |entry| {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_supported_media(path, exts) {
                return None;
            }
            let meta = entry.metadata().ok()?;
            let modified = meta.modified().unwrap_or(UNIX_EPOCH);
            let size = meta.len();
            Some(FileRecord {
                identity: FileIdentity::derive(path, size, modified),
                path: path.to_path_buf(),
                size,
                modified,
                state: FileState::Unknown,
                discovered_at: SystemTime::now(),
            })
        })
}

/// Classify one identity against the ledger snapshot and the failed-marker
/// verdict. Ledger membership always wins: a member is never re-admitted as
/// new, even across restarts.
#[must_use]
pub fn classify(uploaded: &HashSet<FileIdentity>, identity: &FileIdentity, blocked: bool) -> FileState {
    if uploaded.contains(identity) {
        FileState::Uploaded
    } else if blocked {
        FileState::Failed
    } else {
        FileState::Pending
    }
}

fn should_skip_dir(entry: &DirEntry) -> bool {
    // Never skip the root; tempfile roots can be dot-dirs.
    if entry.depth() == 0 {
        return false;
    }
    if !entry.file_type().is_dir() {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discover_finds_nested_media_and_skips_the_rest() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("100CANON")).unwrap();
        fs::create_dir_all(tmp.path().join(".trash")).unwrap();
        fs::write(tmp.path().join("a.JPG"), b"x").unwrap();
        fs::write(tmp.path().join("100CANON/b.mov"), b"x").unwrap();
        fs::write(tmp.path().join("100CANON/sidecar.xmp"), b"x").unwrap();
        fs::write(tmp.path().join(".trash/c.jpg"), b"x").unwrap();

        let mut names: Vec<String> = discover(tmp.path(), None)
            .map(|r| r.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.JPG".to_string(), "b.mov".to_string()]);
    }

    #[test]
    fn discover_of_missing_root_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("not-mounted");
        assert_eq!(discover(&gone, None).count(), 0);
    }

    #[test]
    fn extension_override_narrows_the_set() {
        let exts = vec!["png".to_string()];
        assert!(is_supported_media(Path::new("x.PNG"), Some(&exts)));
        assert!(!is_supported_media(Path::new("x.jpg"), Some(&exts)));
        assert!(is_supported_media(Path::new("x.jpg"), None));
        assert!(!is_supported_media(Path::new("x"), None));
    }

    #[test]
    fn classification_matches_the_ledger_and_failure_markers() {
        let tmp = tempfile::tempdir().unwrap();
        let mut uploaded = HashSet::new();
        let mut records = Vec::new();
        for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg"] {
            let path = tmp.path().join(name);
            fs::write(&path, name.as_bytes()).unwrap();
            records.push(FileIdentity::of_file(&path).unwrap());
        }
        // d.jpg was uploaded on a previous run.
        uploaded.insert(records[3].clone());

        let states: Vec<FileState> = records
            .iter()
            .map(|id| classify(&uploaded, id, false))
            .collect();
        assert_eq!(
            states.iter().filter(|s| **s == FileState::Pending).count(),
            3
        );
        assert_eq!(states[3], FileState::Uploaded);

        // Blocked identities (exhausted or terminal) classify as failed.
        assert_eq!(classify(&uploaded, &records[0], true), FileState::Failed);
        // The ledger wins even over a stale failure marker.
        assert_eq!(classify(&uploaded, &records[3], true), FileState::Uploaded);
    }

    #[test]
    fn observation_tracks_size_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("writing.jpg");
        fs::write(&path, b"partial").unwrap();
        let first = Observation::of(&path).unwrap();
        fs::write(&path, b"partial plus more bytes").unwrap();
        let second = Observation::of(&path).unwrap();
        assert_ne!(first, second);
        assert_eq!(second, Observation::of(&path).unwrap());
    }
}
