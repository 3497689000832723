//! Locating and watching the removable source volume.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc::Sender;
use tracing::{debug, info};

use crate::config::VolumeOptions;

/// Something changed under a mount root; worth re-checking for the volume.
#[derive(Debug)]
pub struct MountActivity;

/// Platform mount points where a volume with `name` may appear.
#[must_use]
pub fn mount_candidates(name: &str) -> Vec<PathBuf> {
    let mut roots = mount_roots();
    for root in &mut roots {
        root.push(name);
    }
    roots
}

fn mount_roots() -> Vec<PathBuf> {
    if cfg!(target_os = "macos") {
        vec![PathBuf::from("/Volumes")]
    } else {
        let mut roots = Vec::new();
        if let Ok(user) = std::env::var("USER") {
            roots.push(Path::new("/media").join(user));
        }
        roots.push(PathBuf::from("/media"));
        roots
    }
}

/// Resolve the photo directory on the mounted volume, if present.
///
/// An explicit `source-path` override wins; otherwise the named volume is
/// looked up under the platform mount roots and its DCIM subdirectory must
/// exist. `None` means "no volume", which callers surface as status.
#[must_use]
pub fn locate(opts: &VolumeOptions) -> Option<PathBuf> {
    if let Some(path) = &opts.source_path {
        if path.is_dir() {
            return Some(path.clone());
        }
        debug!(path = %path.display(), "configured source path is not a directory");
        return None;
    }
    for candidate in mount_candidates(&opts.name) {
        let dcim = candidate.join(&opts.dcim_subdir);
        if dcim.is_dir() {
            return Some(dcim);
        }
        if candidate.is_dir() {
            debug!(volume = %candidate.display(), "volume mounted but has no photo directory");
        }
    }
    None
}

/// Watch the platform mount roots and nudge `tx` on any activity, so the
/// ingest loop re-checks for the volume sooner than its poll interval.
///
/// Watcher setup failures are reported to the caller, who falls back to
/// polling alone. The returned watcher must be kept alive.
pub fn spawn_mount_watcher(
    opts: &VolumeOptions,
    tx: Sender<MountActivity>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            if matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                let _ = tx.blocking_send(MountActivity);
            }
        }
    })?;

    let roots: Vec<PathBuf> = match &opts.source_path {
        Some(path) => path.parent().map(Path::to_path_buf).into_iter().collect(),
        None => mount_roots().into_iter().filter(|r| r.is_dir()).collect(),
    };
    for root in &roots {
        watcher.watch(root, RecursiveMode::NonRecursive)?;
        info!(watching = %root.display(), "mount watcher initialized");
    }
    Ok(watcher)
}
