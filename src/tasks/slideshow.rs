//! The slideshow selector task: consumes the live feed and decides which
//! image the renderer shows next.

use std::time::SystemTime;

use anyhow::Result;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::SlideshowOptions;
use crate::events::FrameRequest;
use crate::feed::{DisplayMode, FeedEntry, OrderPolicy, SharedFeed};
use crate::identity::FileIdentity;

/// Manual controls from the control surface.
#[derive(Debug)]
pub enum SlideshowCommand {
    Next,
    Previous,
    TogglePause,
    Reshuffle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Playback {
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Tracks the shown entry by identity, not index, so feed mutations under a
/// running show cannot desynchronize "current".
#[derive(Debug, Default)]
struct Cursor {
    current: Option<(FileIdentity, SystemTime)>,
}

/// Resolve the cursor against the latest view. A cursor whose identity was
/// filtered out self-heals to the nearest entry inserted after it, wrapping
/// to the first entry; a stale cursor is never an error and never resolves
/// to the stale identity itself.
fn resolve_next<'a>(
    view: &'a [FeedEntry],
    cursor: &Cursor,
    direction: Direction,
) -> Option<&'a FeedEntry> {
    if view.is_empty() {
        return None;
    }
    let Some((identity, inserted_at)) = &cursor.current else {
        return match direction {
            Direction::Forward => view.first(),
            Direction::Backward => view.last(),
        };
    };
    if let Some(idx) = view.iter().position(|e| &e.identity == identity) {
        let len = view.len();
        let next = match direction {
            Direction::Forward => (idx + 1) % len,
            Direction::Backward => (idx + len - 1) % len,
        };
        return view.get(next);
    }
    view.iter()
        .find(|e| e.inserted_at > *inserted_at)
        .or_else(|| view.first())
}

#[instrument(skip_all, fields(order = ?opts.order))]
pub async fn run(
    opts: SlideshowOptions,
    feed: SharedFeed,
    mut commands: Receiver<SlideshowCommand>,
    to_renderer: Sender<FrameRequest>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut rng = match opts.startup_shuffle_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    if opts.order == OrderPolicy::Random {
        // A fresh show gets a fresh order; mutations never reshuffle.
        feed.reshuffle(&mut rng);
    }
    let mode = opts.display_mode();
    let mut playback = Playback::Playing;
    let mut cursor = Cursor::default();
    let mut ticker = time::interval(opts.dwell);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("slideshow started");
    loop {
        select! {
            _ = cancel.cancelled() => break,

            Some(cmd) = commands.recv() => match cmd {
                SlideshowCommand::Next => {
                    advance(&opts, &feed, mode, &mut cursor, Direction::Forward, &to_renderer).await;
                    // Manual navigation owns this tick; no double-advance.
                    ticker.reset();
                }
                SlideshowCommand::Previous => {
                    advance(&opts, &feed, mode, &mut cursor, Direction::Backward, &to_renderer).await;
                    ticker.reset();
                }
                SlideshowCommand::TogglePause => {
                    playback = match playback {
                        Playback::Playing => Playback::Paused,
                        Playback::Paused => {
                            ticker.reset();
                            Playback::Playing
                        }
                    };
                    info!(state = ?playback, "playback toggled");
                }
                SlideshowCommand::Reshuffle => {
                    feed.reshuffle(&mut rng);
                    debug!("order reshuffled");
                }
            },

            _ = ticker.tick() => {
                if playback == Playback::Playing {
                    advance(&opts, &feed, mode, &mut cursor, Direction::Forward, &to_renderer).await;
                }
            }
        }
    }
    // Stopping discards the cursor; nothing else to release.
    info!("slideshow stopped");
    Ok(())
}

async fn advance(
    opts: &SlideshowOptions,
    feed: &SharedFeed,
    mode: DisplayMode,
    cursor: &mut Cursor,
    direction: Direction,
    to_renderer: &Sender<FrameRequest>,
) {
    let mut view = feed.view(mode, opts.order);
    if view.is_empty() && opts.fallback_recent_count > 0 {
        view = feed.fallback_recent(opts.fallback_recent_count);
    }
    let Some(entry) = resolve_next(&view, cursor, direction) else {
        debug!("nothing to display");
        return;
    };
    let frame = entry.display_uri.clone();
    cursor.current = Some((entry.identity.clone(), entry.inserted_at));
    debug!(path = %frame.display(), "frame selected");
    let _ = to_renderer.send(FrameRequest(frame)).await;
}
