//! The ingest task: scans the source volume, classifies candidates against
//! the ledger, and drives the bounded upload worker pool.
//!
//! Scanner and uploader run as one logical background task; everything they
//! learn flows out through the live feed, the ledger, and upload events.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::select;
use tokio::sync::mpsc::{self, Sender};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{UploadClient, UploadError};
use crate::config::{UploaderOptions, VolumeOptions};
use crate::events::UploadEvent;
use crate::failures::FailedStore;
use crate::feed::SharedFeed;
use crate::identity::FileIdentity;
use crate::ledger::Ledger;
use crate::retry::RetryPolicy;
use crate::scan::{self, FileRecord, FileState, Observation};
use crate::volume::{self, MountActivity};

/// Counters for the current upload batch, published to the status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadProgress {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub in_flight: usize,
    pub completed: bool,
    pub volume_present: bool,
}

/// Cheaply clonable handle to the batch counters.
#[derive(Clone, Default)]
pub struct ProgressHandle(Arc<Mutex<UploadProgress>>);

impl ProgressHandle {
    fn lock(&self) -> MutexGuard<'_, UploadProgress> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn snapshot(&self) -> UploadProgress {
        self.lock().clone()
    }

    pub fn reset(&self) {
        *self.lock() = UploadProgress::default();
    }

    fn set_volume(&self, present: bool) {
        self.lock().volume_present = present;
    }

    fn admitted(&self, n: usize) {
        let mut p = self.lock();
        p.total += n;
        p.completed = false;
    }

    fn finished(&self, success: bool) {
        let mut p = self.lock();
        if success {
            p.succeeded += 1;
        } else {
            p.failed += 1;
        }
    }

    fn set_in_flight(&self, n: usize) {
        self.lock().in_flight = n;
    }

    fn mark_completed(&self) {
        let mut p = self.lock();
        if p.total > 0 {
            p.completed = true;
        }
    }
}

/// Everything the ingest task needs; all handles are shared with the rest of
/// the system.
pub struct IngestContext {
    pub volume: VolumeOptions,
    pub uploader: UploaderOptions,
    pub ledger: Arc<Ledger>,
    pub failures: Arc<FailedStore>,
    pub feed: SharedFeed,
    pub client: Arc<dyn UploadClient>,
    pub progress: ProgressHandle,
    /// Optional side channel mirroring the events applied to the feed.
    pub events: Option<Sender<UploadEvent>>,
}

#[derive(Debug)]
enum WorkerOutcome {
    Uploaded(FileIdentity),
    Failed(FileIdentity),
    Cancelled(FileIdentity),
}

#[instrument(skip_all, fields(volume = %ctx.volume.name))]
pub async fn run(ctx: IngestContext, cancel: CancellationToken) -> Result<()> {
    let policy = RetryPolicy {
        max_attempts: ctx.uploader.max_attempts,
        initial_delay: ctx.uploader.retry_initial_delay,
        max_delay: ctx.uploader.retry_max_delay,
    };
    ctx.progress.reset();

    let (mount_tx, mut mount_rx) = mpsc::channel::<MountActivity>(16);
    let _watcher = match volume::spawn_mount_watcher(&ctx.volume, mount_tx) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!("mount watcher unavailable, relying on polling: {err}");
            None
        }
    };

    let quiet = ctx.uploader.quiet_period;
    let mut poll = time::interval(ctx.uploader.scan_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pipeline = Pipeline::new(ctx, policy, cancel.clone());
    let mut workers: JoinSet<WorkerOutcome> = JoinSet::new();
    // Deadline for a follow-up pass while candidates await the stability
    // check or a mount is settling.
    let mut recheck: Option<Instant> = None;

    loop {
        let recheck_deadline =
            recheck.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));
        select! {
            _ = cancel.cancelled() => {
                info!("cancel received, draining in-flight uploads");
                break;
            }

            _ = poll.tick() => {
                if pipeline.pass(&mut workers).await {
                    recheck.get_or_insert(Instant::now() + quiet);
                }
            }

            Some(MountActivity) = mount_rx.recv() => {
                debug!("mount activity, scheduling re-check");
                recheck.get_or_insert(Instant::now() + quiet);
            }

            _ = time::sleep_until(recheck_deadline), if recheck.is_some() => {
                recheck = None;
                if pipeline.pass(&mut workers).await {
                    recheck = Some(Instant::now() + quiet);
                }
            }

            Some(joined) = workers.join_next() => {
                pipeline.handle_joined(joined);
                pipeline.dispatch(&mut workers);
            }
        }
    }

    // In-flight attempts finish or fail cleanly; nothing is killed mid-write.
    while let Some(joined) = workers.join_next().await {
        pipeline.handle_joined(joined);
    }
    Ok(())
}

struct Pipeline {
    ctx: IngestContext,
    policy: RetryPolicy,
    cancel: CancellationToken,
    queue: VecDeque<FileRecord>,
    // Identities queued or in flight; the mutual-exclusion guard.
    scheduled: HashSet<FileIdentity>,
    in_flight: HashSet<FileIdentity>,
    // First sighting per candidate awaiting the write-stability check.
    watchlist: HashMap<FileIdentity, (Observation, Instant)>,
    volume_missing_logged: bool,
}

impl Pipeline {
    fn new(ctx: IngestContext, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            policy,
            cancel,
            queue: VecDeque::new(),
            scheduled: HashSet::new(),
            in_flight: HashSet::new(),
            watchlist: HashMap::new(),
            volume_missing_logged: false,
        }
    }

    /// One scan-and-classify pass. Returns `true` when candidates are still
    /// waiting on the stability check and a follow-up pass should be
    /// scheduled after the quiet period.
    async fn pass(&mut self, workers: &mut JoinSet<WorkerOutcome>) -> bool {
        let Some(root) = volume::locate(&self.ctx.volume) else {
            self.ctx.progress.set_volume(false);
            self.watchlist.clear();
            if !self.volume_missing_logged {
                info!(volume = %self.ctx.volume.name, "no volume mounted, waiting");
                self.volume_missing_logged = true;
            }
            return false;
        };
        self.ctx.progress.set_volume(true);
        self.volume_missing_logged = false;

        let exts = self.ctx.volume.extensions.clone();
        let scan_root = root.clone();
        let discovered: Vec<FileRecord> = match tokio::task::spawn_blocking(move || {
            scan::discover(&scan_root, exts.as_deref()).collect()
        })
        .await
        {
            Ok(records) => records,
            Err(err) => {
                warn!("volume scan failed: {err}");
                return false;
            }
        };
        debug!(root = %root.display(), discovered = discovered.len(), "scan pass");

        let uploaded = self.ctx.ledger.identities_snapshot();
        let now = Instant::now();
        let mut seen = HashSet::new();
        let mut awaiting_stability = false;
        let mut admitted = 0usize;

        for mut record in discovered {
            seen.insert(record.identity.clone());
            if self.scheduled.contains(&record.identity) {
                continue;
            }
            let blocked = self
                .ctx
                .failures
                .blocked(&record.identity, self.ctx.uploader.max_attempts);
            record.state = scan::classify(&uploaded, &record.identity, blocked);
            match record.state {
                FileState::Uploaded | FileState::Failed => {
                    self.ctx.feed.admit(&record);
                }
                FileState::Pending => {
                    let obs = record.observation();
                    let watched = self.watchlist.get(&record.identity).copied();
                    match watched {
                        Some((prev, first_seen))
                            if prev == obs
                                && now.duration_since(first_seen)
                                    >= self.ctx.uploader.quiet_period =>
                        {
                            self.watchlist.remove(&record.identity);
                            self.ctx.feed.admit(&record);
                            info!(
                                path = %record.path.display(),
                                prior_attempts = self.ctx.failures.attempts(&record.identity),
                                "queued for upload"
                            );
                            self.scheduled.insert(record.identity.clone());
                            self.queue.push_back(record);
                            admitted += 1;
                        }
                        Some((prev, _)) if prev != obs => {
                            debug!(path = %record.path.display(), "still being written, deferring");
                            self.watchlist.insert(record.identity.clone(), (obs, now));
                            awaiting_stability = true;
                        }
                        Some(_) => {
                            // Stable so far; quiet period not yet elapsed.
                            awaiting_stability = true;
                        }
                        None => {
                            debug!(path = %record.path.display(), "first sighting, awaiting stability");
                            self.watchlist.insert(record.identity.clone(), (obs, now));
                            awaiting_stability = true;
                        }
                    }
                }
                FileState::Unknown | FileState::Uploading => {}
            }
        }

        // Drop watch entries for files that vanished or changed identity.
        self.watchlist.retain(|id, _| seen.contains(id));

        if admitted > 0 {
            self.ctx.progress.admitted(admitted);
        }
        self.dispatch(workers);
        awaiting_stability
    }

    /// Fill free worker slots from the queue. At most one attempt per
    /// identity is ever in flight.
    fn dispatch(&mut self, workers: &mut JoinSet<WorkerOutcome>) {
        while self.in_flight.len() < self.ctx.uploader.workers {
            let Some(record) = self.queue.pop_front() else {
                break;
            };
            if !self.in_flight.insert(record.identity.clone()) {
                continue;
            }
            let job = UploadJob {
                record,
                client: self.ctx.client.clone(),
                ledger: self.ctx.ledger.clone(),
                failures: self.ctx.failures.clone(),
                feed: self.ctx.feed.clone(),
                events: self.ctx.events.clone(),
                policy: self.policy.clone(),
                cancel: self.cancel.clone(),
            };
            workers.spawn(job.run());
        }
        self.ctx.progress.set_in_flight(self.in_flight.len());
    }

    fn handle_joined(&mut self, joined: Result<WorkerOutcome, JoinError>) {
        match joined {
            Ok(outcome) => {
                let identity = match &outcome {
                    WorkerOutcome::Uploaded(id)
                    | WorkerOutcome::Failed(id)
                    | WorkerOutcome::Cancelled(id) => id.clone(),
                };
                self.in_flight.remove(&identity);
                self.scheduled.remove(&identity);
                match outcome {
                    WorkerOutcome::Uploaded(_) => self.ctx.progress.finished(true),
                    WorkerOutcome::Failed(_) => self.ctx.progress.finished(false),
                    WorkerOutcome::Cancelled(_) => {}
                }
            }
            Err(err) => warn!("upload worker aborted: {err}"),
        }
        self.ctx.progress.set_in_flight(self.in_flight.len());
        if self.queue.is_empty() && self.in_flight.is_empty() {
            self.ctx.progress.mark_completed();
        }
    }
}

/// One file's journey through Pending -> Uploading -> (Uploaded | Failed),
/// with bounded backoff on transient failures.
struct UploadJob {
    record: FileRecord,
    client: Arc<dyn UploadClient>,
    ledger: Arc<Ledger>,
    failures: Arc<FailedStore>,
    feed: SharedFeed,
    events: Option<Sender<UploadEvent>>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl UploadJob {
    async fn emit(&self, event: UploadEvent) {
        self.feed.apply(&event);
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    async fn run(self) -> WorkerOutcome {
        let identity = self.record.identity.clone();
        loop {
            self.emit(UploadEvent::AttemptStarted {
                identity: identity.clone(),
            })
            .await;

            let client = self.client.clone();
            let path = self.record.path.clone();
            let attempt = tokio::task::spawn_blocking(move || client.upload(&path))
                .await
                .unwrap_or_else(|err| {
                    Err(UploadError::Transient(format!("upload worker panicked: {err}")))
                });

            let failure = match attempt {
                Ok(remote_id) => {
                    // The ledger append is the sole commit point: success is
                    // not success until it is durable.
                    match self
                        .ledger
                        .record_success(&identity, remote_id.clone(), &self.record.path)
                    {
                        Ok(_) => {
                            self.failures.clear(&identity);
                            info!(
                                path = %self.record.path.display(),
                                remote_id = %remote_id.0,
                                "uploaded"
                            );
                            self.emit(UploadEvent::Completed {
                                identity: identity.clone(),
                                remote_id,
                            })
                            .await;
                            return WorkerOutcome::Uploaded(identity);
                        }
                        Err(err) => UploadError::Transient(format!("ledger write failed: {err}")),
                    }
                }
                Err(err) => err,
            };

            let terminal = failure.is_terminal();
            let count = self.failures.record_failure(
                &identity,
                &self.record.path,
                &failure.to_string(),
                terminal,
            );
            if terminal || !self.policy.allows(count) {
                warn!(
                    path = %self.record.path.display(),
                    attempts = count,
                    terminal,
                    "giving up: {failure}"
                );
                self.emit(UploadEvent::Failed {
                    identity: identity.clone(),
                    message: failure.to_string(),
                    terminal,
                })
                .await;
                return WorkerOutcome::Failed(identity);
            }

            let delay = self.policy.delay_for(count + 1);
            debug!(
                path = %self.record.path.display(),
                attempt = count,
                delay_ms = delay.as_millis() as u64,
                "transient failure, backing off: {failure}"
            );
            select! {
                // The attempt ends cleanly; the persisted count resumes the
                // schedule on the next run.
                _ = self.cancel.cancelled() => return WorkerOutcome::Cancelled(identity),
                _ = time::sleep(delay) => {}
            }
        }
    }
}
