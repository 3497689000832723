//! Task lifecycle owner: starts, stops, and reports on the uploader and
//! slideshow tasks. Owns lifecycle only; the tasks own their logic.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::UploadClient;
use crate::config::Configuration;
use crate::events::FrameRequest;
use crate::failures::FailedStore;
use crate::feed::SharedFeed;
use crate::ledger::Ledger;
use crate::tasks::ingest::{self, IngestContext, ProgressHandle, UploadProgress};
use crate::tasks::slideshow::{self, SlideshowCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// The supervisor's externally visible session state.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub uploader_running: bool,
    pub slideshow_running: bool,
    pub uploader_uptime: Option<String>,
    pub slideshow_uptime: Option<String>,
    pub progress: UploadProgress,
}

struct TaskSlot {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    started_at: Instant,
}

impl TaskSlot {
    fn running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn uptime(&self) -> String {
        humantime::format_duration(Duration::from_secs(self.started_at.elapsed().as_secs()))
            .to_string()
    }
}

#[derive(Default)]
struct Session {
    uploader: Option<TaskSlot>,
    slideshow: Option<TaskSlot>,
    slideshow_commands: Option<Sender<SlideshowCommand>>,
}

pub struct Supervisor {
    cfg: Configuration,
    ledger: Arc<Ledger>,
    failures: Arc<FailedStore>,
    feed: SharedFeed,
    client: Arc<dyn UploadClient>,
    progress: ProgressHandle,
    frame_tx: Sender<FrameRequest>,
    session: Mutex<Session>,
}

impl Supervisor {
    pub fn new(
        cfg: Configuration,
        ledger: Arc<Ledger>,
        failures: Arc<FailedStore>,
        feed: SharedFeed,
        client: Arc<dyn UploadClient>,
        frame_tx: Sender<FrameRequest>,
    ) -> Self {
        Self {
            cfg,
            ledger,
            failures,
            feed,
            client,
            progress: ProgressHandle::default(),
            frame_tx,
            session: Mutex::new(Session::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Idempotent: a second start while running reports `AlreadyRunning`
    /// and spawns nothing.
    pub fn start_uploader(&self) -> StartOutcome {
        let mut session = self.lock();
        if session.uploader.as_ref().is_some_and(TaskSlot::running) {
            return StartOutcome::AlreadyRunning;
        }
        let cancel = CancellationToken::new();
        let ctx = IngestContext {
            volume: self.cfg.volume.clone(),
            uploader: self.cfg.uploader.clone(),
            ledger: self.ledger.clone(),
            failures: self.failures.clone(),
            feed: self.feed.clone(),
            client: self.client.clone(),
            progress: self.progress.clone(),
            events: None,
        };
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = ingest::run(ctx, task_cancel).await {
                error!("uploader task failed: {err:#}");
            }
        });
        session.uploader = Some(TaskSlot {
            cancel,
            handle,
            started_at: Instant::now(),
        });
        info!("uploader started");
        StartOutcome::Started
    }

    /// Idempotent; in-flight uploads drain in the background after the slot
    /// is released.
    pub fn stop_uploader(&self) -> StopOutcome {
        let mut session = self.lock();
        match session.uploader.take() {
            Some(slot) if slot.running() => {
                slot.cancel.cancel();
                info!("uploader stopping");
                StopOutcome::Stopped
            }
            _ => StopOutcome::NotRunning,
        }
    }

    pub fn start_slideshow(&self) -> StartOutcome {
        let mut session = self.lock();
        if session.slideshow.as_ref().is_some_and(TaskSlot::running) {
            return StartOutcome::AlreadyRunning;
        }
        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel::<SlideshowCommand>(8);
        let opts = self.cfg.slideshow.clone();
        let feed = self.feed.clone();
        let frame_tx = self.frame_tx.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = slideshow::run(opts, feed, cmd_rx, frame_tx, task_cancel).await {
                error!("slideshow task failed: {err:#}");
            }
        });
        session.slideshow = Some(TaskSlot {
            cancel,
            handle,
            started_at: Instant::now(),
        });
        session.slideshow_commands = Some(cmd_tx);
        info!("slideshow started");
        StartOutcome::Started
    }

    pub fn stop_slideshow(&self) -> StopOutcome {
        let mut session = self.lock();
        session.slideshow_commands = None;
        match session.slideshow.take() {
            Some(slot) if slot.running() => {
                slot.cancel.cancel();
                info!("slideshow stopping");
                StopOutcome::Stopped
            }
            _ => StopOutcome::NotRunning,
        }
    }

    /// Forward a navigation command to a running slideshow; `false` when it
    /// is not running.
    pub async fn slideshow_command(&self, cmd: SlideshowCommand) -> bool {
        let tx = {
            let session = self.lock();
            if session.slideshow.as_ref().is_some_and(TaskSlot::running) {
                session.slideshow_commands.clone()
            } else {
                None
            }
        };
        match tx {
            Some(tx) => tx.send(cmd).await.is_ok(),
            None => false,
        }
    }

    pub fn status(&self) -> Status {
        let session = self.lock();
        let uploader = session.uploader.as_ref().filter(|s| s.running());
        let slideshow = session.slideshow.as_ref().filter(|s| s.running());
        Status {
            uploader_running: uploader.is_some(),
            slideshow_running: slideshow.is_some(),
            uploader_uptime: uploader.map(TaskSlot::uptime),
            slideshow_uptime: slideshow.map(TaskSlot::uptime),
            progress: self.progress.snapshot(),
        }
    }

    /// Stop both tasks and wait for them to settle. Used on process exit.
    pub async fn shutdown(&self) {
        let (uploader, slideshow) = {
            let mut session = self.lock();
            session.slideshow_commands = None;
            (session.uploader.take(), session.slideshow.take())
        };
        for slot in [&uploader, &slideshow].into_iter().flatten() {
            slot.cancel.cancel();
        }
        for slot in [uploader, slideshow].into_iter().flatten() {
            let _ = slot.handle.await;
        }
    }
}
