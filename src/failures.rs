//! Persistent markers for files whose upload attempts have failed.
//!
//! Keeps attempt counts and the last error per identity so the bounded retry
//! count survives process restarts. The store is advisory: an unreadable file
//! is replaced with a warning rather than failing startup, matching the
//! ledger/marker split where only the ledger is a durability barrier.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::identity::FileIdentity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub attempt_count: u32,
    pub last_error: String,
    pub last_attempt: DateTime<Utc>,
    /// Terminal failures are blocked from retry regardless of count.
    #[serde(default)]
    pub terminal: bool,
}

pub struct FailedStore {
    path: PathBuf,
    inner: Mutex<HashMap<FileIdentity, FailureRecord>>,
}

impl FailedStore {
    /// Load the marker store from `path`, starting fresh if it is missing or
    /// unreadable.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(err) => {
                    warn!(path = %path.display(), "failed-marker store unreadable, starting fresh: {err}");
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                warn!(path = %path.display(), "failed-marker store unreadable, starting fresh: {err}");
                HashMap::new()
            }
        };
        Self {
            path,
            inner: Mutex::new(records),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FileIdentity, FailureRecord>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn attempts(&self, identity: &FileIdentity) -> u32 {
        self.lock().get(identity).map_or(0, |r| r.attempt_count)
    }

    #[must_use]
    pub fn last_error(&self, identity: &FileIdentity) -> Option<String> {
        self.lock().get(identity).map(|r| r.last_error.clone())
    }

    /// `true` when the identity must not be retried automatically: a
    /// terminal failure, or the bounded attempt count is spent.
    #[must_use]
    pub fn blocked(&self, identity: &FileIdentity, max_attempts: u32) -> bool {
        self.lock()
            .get(identity)
            .is_some_and(|r| r.terminal || r.attempt_count >= max_attempts)
    }

    /// Record one more failed attempt and persist; returns the new count.
    pub fn record_failure(
        &self,
        identity: &FileIdentity,
        path: &Path,
        error: &str,
        terminal: bool,
    ) -> u32 {
        let count;
        {
            let mut map = self.lock();
            let record = map.entry(identity.clone()).or_insert_with(|| FailureRecord {
                path: path.to_path_buf(),
                attempt_count: 0,
                last_error: String::new(),
                last_attempt: Utc::now(),
                terminal: false,
            });
            record.attempt_count += 1;
            record.last_error = error.to_string();
            record.last_attempt = Utc::now();
            record.terminal |= terminal;
            count = record.attempt_count;
            self.persist(&map);
        }
        count
    }

    /// Drop the marker for an identity that finally uploaded.
    pub fn clear(&self, identity: &FileIdentity) {
        let mut map = self.lock();
        if map.remove(identity).is_some() {
            self.persist(&map);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Write-temp-then-rename keeps the previous store intact on a crash.
    fn persist(&self, map: &HashMap<FileIdentity, FailureRecord>) {
        let tmp = self.path.with_extension("json.tmp");
        let result = serde_json::to_string_pretty(map)
            .map_err(std::io::Error::other)
            .and_then(|encoded| std::fs::write(&tmp, encoded))
            .and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(err) = result {
            warn!(path = %self.path.display(), "could not persist failed-marker store: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn identity(n: u64) -> FileIdentity {
        FileIdentity::derive(Path::new("/vol/DCIM/x.jpg"), n, UNIX_EPOCH)
    }

    #[test]
    fn attempts_accumulate_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.json");
        let id = identity(1);
        {
            let store = FailedStore::load(&path);
            assert_eq!(store.attempts(&id), 0);
            assert_eq!(
                store.record_failure(&id, Path::new("/a"), "rate limited", false),
                1
            );
            assert_eq!(
                store.record_failure(&id, Path::new("/a"), "timeout", false),
                2
            );
            assert_eq!(store.last_error(&id).as_deref(), Some("timeout"));
        }
        let reloaded = FailedStore::load(&path);
        assert_eq!(reloaded.attempts(&id), 2);
    }

    #[test]
    fn blocking_counts_exhaustion_and_terminal_markers() {
        let dir = tempfile::tempdir().unwrap();
        let store = FailedStore::load(dir.path().join("failed.json"));
        let flaky = identity(10);
        let broken = identity(11);

        store.record_failure(&flaky, Path::new("/a"), "timeout", false);
        assert!(!store.blocked(&flaky, 3));
        store.record_failure(&flaky, Path::new("/a"), "timeout", false);
        store.record_failure(&flaky, Path::new("/a"), "timeout", false);
        assert!(store.blocked(&flaky, 3));

        store.record_failure(&broken, Path::new("/b"), "unsupported format", true);
        assert!(store.blocked(&broken, 3), "terminal blocks on the first strike");
    }

    #[test]
    fn clear_removes_the_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.json");
        let id = identity(2);
        let store = FailedStore::load(&path);
        store.record_failure(&id, Path::new("/a"), "boom", false);
        store.clear(&id);
        assert_eq!(store.attempts(&id), 0);
        assert!(FailedStore::load(&path).is_empty());
    }

    #[test]
    fn garbage_store_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.json");
        std::fs::write(&path, "][ nope").unwrap();
        let store = FailedStore::load(&path);
        assert!(store.is_empty());
    }
}
