//! Durable record of which source files have been uploaded.
//!
//! The ledger is an append-only JSON-lines file. Membership is the single
//! source of truth for "already uploaded": the scanner must never re-classify
//! a member as new, even across process restarts. Writes happen only from the
//! upload pipeline; the append is the sole commit point for a successful
//! upload.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;
use crate::identity::FileIdentity;

/// Opaque identifier minted by the cloud library for a committed media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub String);

#[derive(Debug, Serialize, Deserialize)]
struct LedgerLine {
    identity: FileIdentity,
    remote_id: RemoteId,
    path: PathBuf,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<FileIdentity, RemoteId>,
    writer: File,
}

/// Append-only identity -> remote-id map.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl Ledger {
    /// Open `path`, replaying any existing log.
    ///
    /// Replay is idempotent: duplicate lines collapse to one entry. A torn
    /// final line (crash mid-append) is skipped; any other malformed line is
    /// [`Error::CorruptLedger`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();
        let mut needs_newline = false;

        match File::open(&path) {
            Ok(mut file) => {
                let mut raw = String::new();
                file.read_to_string(&mut raw)?;
                needs_newline = !raw.is_empty() && !raw.ends_with('\n');
                let lines: Vec<&str> = raw.lines().collect();
                for (idx, line) in lines.iter().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<LedgerLine>(line) {
                        Ok(entry) => {
                            entries.insert(entry.identity, entry.remote_id);
                        }
                        Err(err) if idx + 1 == lines.len() => {
                            // Crash artifact from an interrupted append.
                            warn!(
                                path = %path.display(),
                                line = idx + 1,
                                "ignoring torn final ledger line: {err}"
                            );
                        }
                        Err(err) => {
                            return Err(Error::CorruptLedger {
                                path,
                                line: idx + 1,
                                reason: err.to_string(),
                            });
                        }
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let mut writer = OpenOptions::new().create(true).append(true).open(&path)?;
        if needs_newline {
            // Terminate the torn line so the next append starts clean.
            writer.write_all(b"\n")?;
        }

        Ok(Self {
            path,
            inner: Mutex::new(Inner { entries, writer }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn has(&self, identity: &FileIdentity) -> bool {
        self.lock().entries.contains_key(identity)
    }

    #[must_use]
    pub fn remote_id(&self, identity: &FileIdentity) -> Option<RemoteId> {
        self.lock().entries.get(identity).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Snapshot of all recorded identities, for bulk classification.
    #[must_use]
    pub fn identities_snapshot(&self) -> HashSet<FileIdentity> {
        self.lock().entries.keys().cloned().collect()
    }

    /// Record a successful upload. Idempotent: an already-present identity is
    /// a no-op returning `Ok(false)`.
    ///
    /// The entry is appended, flushed, and synced before this returns; an IO
    /// failure here means the upload attempt is not committed and must be
    /// treated by the caller as a failed attempt.
    pub fn record_success(
        &self,
        identity: &FileIdentity,
        remote_id: RemoteId,
        path: &Path,
    ) -> Result<bool, Error> {
        let mut inner = self.lock();
        if inner.entries.contains_key(identity) {
            return Ok(false);
        }
        let line = LedgerLine {
            identity: identity.clone(),
            remote_id: remote_id.clone(),
            path: path.to_path_buf(),
            recorded_at: Utc::now(),
        };
        let mut encoded = serde_json::to_string(&line).map_err(std::io::Error::other)?;
        encoded.push('\n');
        inner.writer.write_all(encoded.as_bytes())?;
        inner.writer.flush()?;
        inner.writer.sync_data()?;
        inner.entries.insert(identity.clone(), remote_id);
        Ok(true)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
