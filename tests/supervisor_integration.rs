use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use photo_courier::client::{UploadClient, UploadError};
use photo_courier::config::Configuration;
use photo_courier::events::FrameRequest;
use photo_courier::failures::FailedStore;
use photo_courier::feed::SharedFeed;
use photo_courier::ledger::{Ledger, RemoteId};
use photo_courier::supervisor::{StartOutcome, StopOutcome, Supervisor};
use photo_courier::tasks::slideshow::SlideshowCommand;
use tempfile::TempDir;
use tokio::sync::mpsc;

struct NullClient;

impl UploadClient for NullClient {
    fn upload(&self, path: &Path) -> Result<RemoteId, UploadError> {
        Ok(RemoteId(format!("remote-{}", path.display())))
    }
}

fn supervisor_fixture() -> (Arc<Supervisor>, mpsc::Receiver<FrameRequest>, TempDir) {
    let state = TempDir::new().unwrap();
    let mut cfg = Configuration::default();
    cfg.state_dir = state.path().to_path_buf();
    cfg.volume.source_path = Some(state.path().join("no-volume"));
    cfg.uploader.scan_interval = Duration::from_millis(50);
    cfg.slideshow.dwell = Duration::from_millis(50);

    let ledger = Arc::new(Ledger::open(cfg.ledger_path()).unwrap());
    let failures = Arc::new(FailedStore::load(cfg.failures_path()));
    let feed = SharedFeed::new(cfg.slideshow.display_mode());
    let (frame_tx, frame_rx) = mpsc::channel(8);
    let supervisor = Arc::new(Supervisor::new(
        cfg,
        ledger,
        failures,
        feed,
        Arc::new(NullClient),
        frame_tx,
    ));
    (supervisor, frame_rx, state)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn starting_the_uploader_twice_is_idempotent() {
    let (supervisor, _frames, _state) = supervisor_fixture();

    assert_eq!(supervisor.start_uploader(), StartOutcome::Started);
    assert_eq!(supervisor.start_uploader(), StartOutcome::AlreadyRunning);
    assert_eq!(supervisor.start_uploader(), StartOutcome::AlreadyRunning);
    assert!(supervisor.status().uploader_running);

    assert_eq!(supervisor.stop_uploader(), StopOutcome::Stopped);
    assert!(!supervisor.status().uploader_running);
    assert_eq!(supervisor.stop_uploader(), StopOutcome::NotRunning);

    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_slideshow_reports_immediately_and_stays_stopped() {
    let (supervisor, _frames, _state) = supervisor_fixture();

    assert_eq!(supervisor.start_slideshow(), StartOutcome::Started);
    assert!(supervisor.status().slideshow_running);

    assert_eq!(supervisor.stop_slideshow(), StopOutcome::Stopped);
    assert!(!supervisor.status().slideshow_running);
    assert_eq!(supervisor.stop_slideshow(), StopOutcome::NotRunning);
    assert!(!supervisor.status().slideshow_running);

    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slideshow_can_be_restarted_after_stop() {
    let (supervisor, _frames, _state) = supervisor_fixture();

    assert_eq!(supervisor.start_slideshow(), StartOutcome::Started);
    assert_eq!(supervisor.stop_slideshow(), StopOutcome::Stopped);
    assert_eq!(supervisor.start_slideshow(), StartOutcome::Started);
    assert!(supervisor.status().slideshow_running);

    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commands_to_a_stopped_slideshow_are_rejected() {
    let (supervisor, _frames, _state) = supervisor_fixture();

    assert!(!supervisor.slideshow_command(SlideshowCommand::Next).await);
    supervisor.start_slideshow();
    assert!(supervisor.slideshow_command(SlideshowCommand::Next).await);
    supervisor.stop_slideshow();
    assert!(!supervisor.slideshow_command(SlideshowCommand::Next).await);

    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_both_tasks() {
    let (supervisor, _frames, _state) = supervisor_fixture();

    supervisor.start_uploader();
    supervisor.start_slideshow();
    supervisor.shutdown().await;

    let status = supervisor.status();
    assert!(!status.uploader_running);
    assert!(!status.slideshow_running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_volume_is_status_not_an_error() {
    let (supervisor, _frames, _state) = supervisor_fixture();

    supervisor.start_uploader();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = supervisor.status();
    assert!(status.uploader_running, "uploader keeps waiting for a volume");
    assert!(!status.progress.volume_present);

    supervisor.shutdown().await;
}
