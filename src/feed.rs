//! The live feed: the continuously updated, filterable set of images
//! eligible for slideshow display.
//!
//! Mutations (seed, apply, reshuffle) are serialized behind one lock; reads
//! clone a consistent snapshot so the selector never observes a half-applied
//! event. Entries transition in place and are never duplicated.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;

use crate::events::UploadEvent;
use crate::identity::FileIdentity;
use crate::scan::{FileRecord, FileState};

/// Which subset of the feed a view exposes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayMode {
    All,
    RecentWindow(Duration),
    CurrentlyUploadingOnly,
    ExcludePendingAndFailed,
}

/// Ordering applied to a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderPolicy {
    Insertion,
    Random,
}

/// How an entry got into the feed: part of the already-uploaded backlog from
/// a previous run, or a candidate in the current upload batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    Backlog,
    Candidate,
}

#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub identity: FileIdentity,
    pub display_uri: PathBuf,
    pub state: FileState,
    pub inserted_at: SystemTime,
    pub origin: EntryOrigin,
}

#[derive(Default)]
pub struct LiveFeed {
    entries: Vec<FeedEntry>,
    index: HashMap<FileIdentity, usize>,
    // Random-order projection. Regenerated only on an explicit reshuffle;
    // new entries are appended so a running cursor is not disrupted.
    shuffled: Vec<FileIdentity>,
    active_mode: Option<DisplayMode>,
}

impl LiveFeed {
    /// `active_mode` governs which records seeding admits at all; views can
    /// still be requested in any mode.
    #[must_use]
    pub fn new(active_mode: DisplayMode) -> Self {
        Self {
            active_mode: Some(active_mode),
            ..Self::default()
        }
    }

    /// Bulk initial population from a scanner pass.
    pub fn seed<I: IntoIterator<Item = FileRecord>>(&mut self, records: I) {
        for record in records {
            self.admit(&record);
        }
    }

    /// Insert one classified record unless the active display mode excludes
    /// it. Re-admitting a tracked identity is a no-op.
    pub fn admit(&mut self, record: &FileRecord) {
        if record.state == FileState::Unknown {
            debug_assert!(false, "unclassified record offered to the feed");
            return;
        }
        if self.index.contains_key(&record.identity) {
            return;
        }
        let origin = if record.state == FileState::Uploaded {
            EntryOrigin::Backlog
        } else {
            EntryOrigin::Candidate
        };
        // Backlog entries date from when the shot landed on disk, so the
        // recent-window filter means "taken recently", matching the original
        // mtime-based recency rule. Live candidates date from discovery.
        let inserted_at = match origin {
            EntryOrigin::Backlog => record.modified,
            EntryOrigin::Candidate => record.discovered_at,
        };
        let entry = FeedEntry {
            identity: record.identity.clone(),
            display_uri: record.path.clone(),
            state: record.state,
            inserted_at,
            origin,
        };
        if let Some(mode) = self.active_mode {
            if !entry_matches(&entry, mode, SystemTime::now()) {
                return;
            }
        }
        self.index.insert(entry.identity.clone(), self.entries.len());
        self.shuffled.push(entry.identity.clone());
        self.entries.push(entry);
    }

    /// In-place state update for a tracked identity. Unknown identities are
    /// a no-op (the display-mode filter may have excluded them at seed time).
    pub fn apply(&mut self, event: &UploadEvent) {
        let (identity, state) = match event {
            UploadEvent::AttemptStarted { identity } => (identity, FileState::Uploading),
            UploadEvent::Completed { identity, .. } => (identity, FileState::Uploaded),
            UploadEvent::Failed { identity, .. } => (identity, FileState::Failed),
        };
        if let Some(&idx) = self.index.get(identity) {
            self.entries[idx].state = state;
        }
    }

    /// Recompute a view on demand. Membership and order are derived fresh
    /// from the requested mode and policy; the underlying set is untouched.
    #[must_use]
    pub fn view(&self, mode: DisplayMode, order: OrderPolicy) -> Vec<FeedEntry> {
        self.view_at(mode, order, SystemTime::now())
    }

    fn view_at(&self, mode: DisplayMode, order: OrderPolicy, now: SystemTime) -> Vec<FeedEntry> {
        match order {
            OrderPolicy::Insertion => self
                .entries
                .iter()
                .filter(|e| entry_matches(e, mode, now))
                .cloned()
                .collect(),
            OrderPolicy::Random => self
                .shuffled
                .iter()
                .filter_map(|id| self.index.get(id).map(|&idx| &self.entries[idx]))
                .filter(|e| entry_matches(e, mode, now))
                .cloned()
                .collect(),
        }
    }

    /// Re-derive the random order. Only called on explicit request (slideshow
    /// restart), never on mutation.
    pub fn reshuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.shuffled.shuffle(rng);
    }

    /// The most recent `n` uploaded entries in chronological order; the
    /// selector's fallback when a filtered view comes up empty.
    #[must_use]
    pub fn fallback_recent(&self, n: usize) -> Vec<FeedEntry> {
        let mut uploaded: Vec<&FeedEntry> = self
            .entries
            .iter()
            .filter(|e| e.state == FileState::Uploaded)
            .collect();
        uploaded.sort_by_key(|e| e.inserted_at);
        let skip = uploaded.len().saturating_sub(n);
        uploaded.into_iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn entry_matches(entry: &FeedEntry, mode: DisplayMode, now: SystemTime) -> bool {
    match mode {
        DisplayMode::All => true,
        DisplayMode::RecentWindow(window) => now
            .duration_since(entry.inserted_at)
            .map(|age| age <= window)
            .unwrap_or(true),
        DisplayMode::CurrentlyUploadingOnly => entry.origin == EntryOrigin::Candidate,
        DisplayMode::ExcludePendingAndFailed => entry.state == FileState::Uploaded,
    }
}

/// Cheaply clonable handle. Mutations serialize behind the write lock;
/// views take the read lock concurrently and clone a consistent snapshot.
#[derive(Clone)]
pub struct SharedFeed(Arc<RwLock<LiveFeed>>);

impl SharedFeed {
    #[must_use]
    pub fn new(active_mode: DisplayMode) -> Self {
        Self(Arc::new(RwLock::new(LiveFeed::new(active_mode))))
    }

    fn read(&self) -> RwLockReadGuard<'_, LiveFeed> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LiveFeed> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn seed<I: IntoIterator<Item = FileRecord>>(&self, records: I) {
        self.write().seed(records);
    }

    pub fn admit(&self, record: &FileRecord) {
        self.write().admit(record);
    }

    pub fn apply(&self, event: &UploadEvent) {
        self.write().apply(event);
    }

    #[must_use]
    pub fn view(&self, mode: DisplayMode, order: OrderPolicy) -> Vec<FeedEntry> {
        self.read().view(mode, order)
    }

    pub fn reshuffle<R: Rng + ?Sized>(&self, rng: &mut R) {
        self.write().reshuffle(rng);
    }

    #[must_use]
    pub fn fallback_recent(&self, n: usize) -> Vec<FeedEntry> {
        self.read().fallback_recent(n)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
