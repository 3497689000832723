//! Runtime configuration parsed from YAML.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::feed::{DisplayMode, OrderPolicy};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// How to find the removable source volume.
    pub volume: VolumeOptions,
    /// Directory holding the ledger and failed-attempt markers.
    pub state_dir: PathBuf,
    /// Upload pipeline tuning.
    pub uploader: UploaderOptions,
    /// Slideshow selection behavior.
    pub slideshow: SlideshowOptions,
    /// Control API binding.
    pub control: ControlOptions,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&s).context("parsing configuration")
    }

    /// Validate runtime invariants that cannot be expressed via serde
    /// defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.volume.name.is_empty() || self.volume.source_path.is_some(),
            "volume.name or volume.source-path must be set"
        );
        ensure!(
            !self.state_dir.as_os_str().is_empty(),
            "state-dir must be set"
        );
        ensure!(self.uploader.workers > 0, "uploader.workers must be greater than zero");
        ensure!(
            self.uploader.max_attempts > 0,
            "uploader.max-attempts must be greater than zero"
        );
        ensure!(
            self.uploader.scan_interval > Duration::ZERO,
            "uploader.scan-interval must be positive"
        );
        ensure!(
            self.uploader.quiet_period > Duration::ZERO,
            "uploader.quiet-period must be positive"
        );
        ensure!(
            !self.uploader.command.program.as_os_str().is_empty(),
            "uploader.command.program must be set"
        );
        ensure!(
            self.slideshow.dwell > Duration::ZERO,
            "slideshow.dwell must be positive"
        );
        ensure!(
            self.slideshow.recent_window > Duration::ZERO,
            "slideshow.recent-window must be positive"
        );
        Ok(self)
    }

    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("uploaded.ndjson")
    }

    #[must_use]
    pub fn failures_path(&self) -> PathBuf {
        self.state_dir.join("failed.json")
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            volume: VolumeOptions::default(),
            state_dir: default_state_dir(),
            uploader: UploaderOptions::default(),
            slideshow: SlideshowOptions::default(),
            control: ControlOptions::default(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".photo-courier")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct VolumeOptions {
    /// Volume label the card mounts under.
    pub name: String,
    /// Photo directory relative to the mount point.
    pub dcim_subdir: PathBuf,
    /// Bypass volume discovery and scan this directory instead.
    pub source_path: Option<PathBuf>,
    /// Override for accepted extensions (lowercase, without dot).
    pub extensions: Option<Vec<String>>,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            name: "Untitled".into(),
            dcim_subdir: PathBuf::from("DCIM"),
            source_path: None,
            extensions: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct UploaderOptions {
    /// Album the external uploader files new items under.
    pub album_name: String,
    /// Concurrent upload workers.
    pub workers: usize,
    /// Bounded attempt count per file, persisted across restarts.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt.
    #[serde(with = "humantime_serde")]
    pub retry_initial_delay: Duration,
    /// Backoff ceiling.
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,
    /// How often to re-check the volume when no mount event arrives.
    #[serde(with = "humantime_serde")]
    pub scan_interval: Duration,
    /// A new file must hold the same size and mtime this long before it is
    /// admitted as a genuine candidate (guards against partial writes).
    #[serde(with = "humantime_serde")]
    pub quiet_period: Duration,
    /// External uploader command.
    pub command: UploadCommand,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        Self {
            album_name: "Photo Courier".into(),
            workers: 5,
            max_attempts: 3,
            retry_initial_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(60),
            scan_interval: Duration::from_secs(60),
            quiet_period: Duration::from_secs(2),
            command: UploadCommand::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct UploadCommand {
    /// Program to run once per file; the file path is appended as the final
    /// argument and the remote id is read from stdout.
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Exit code the program uses for permanent rejections.
    pub terminal_exit_code: i32,
}

impl Default for UploadCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::new(),
            args: Vec::new(),
            terminal_exit_code: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SlideshowOptions {
    /// Time each image stays on screen.
    #[serde(with = "humantime_serde")]
    pub dwell: Duration,
    pub order: OrderPolicy,
    pub mode: FeedModeConfig,
    /// Window backing the `recent` mode.
    #[serde(with = "humantime_serde")]
    pub recent_window: Duration,
    /// When the filtered view is empty, show this many of the most recent
    /// uploads instead of a blank screen. Zero disables the fallback.
    pub fallback_recent_count: usize,
    /// Optional deterministic seed for the random order.
    pub startup_shuffle_seed: Option<u64>,
}

impl SlideshowOptions {
    #[must_use]
    pub fn display_mode(&self) -> DisplayMode {
        match self.mode {
            FeedModeConfig::All => DisplayMode::All,
            FeedModeConfig::Recent => DisplayMode::RecentWindow(self.recent_window),
            FeedModeConfig::CurrentOnly => DisplayMode::CurrentlyUploadingOnly,
            FeedModeConfig::UploadedOnly => DisplayMode::ExcludePendingAndFailed,
        }
    }
}

impl Default for SlideshowOptions {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(5),
            order: OrderPolicy::Insertion,
            mode: FeedModeConfig::Recent,
            recent_window: Duration::from_secs(60 * 60 * 24),
            fallback_recent_count: 200,
            startup_shuffle_seed: None,
        }
    }
}

/// Display-mode names as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedModeConfig {
    All,
    Recent,
    CurrentOnly,
    UploadedOnly,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ControlOptions {
    pub enabled: bool,
    pub bind_addr: SocketAddr,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}
