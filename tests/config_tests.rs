use std::path::PathBuf;
use std::time::Duration;

use photo_courier::config::{Configuration, FeedModeConfig};
use photo_courier::feed::{DisplayMode, OrderPolicy};

#[test]
fn parse_kebab_case_config() {
    let yaml = r#"
volume:
  name: "EOS_DIGITAL"
state-dir: "/var/lib/photo-courier"
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.volume.name, "EOS_DIGITAL");
    assert_eq!(cfg.volume.dcim_subdir, PathBuf::from("DCIM"));
    assert_eq!(cfg.state_dir, PathBuf::from("/var/lib/photo-courier"));
    assert_eq!(cfg.uploader.workers, 5);
    assert_eq!(cfg.uploader.max_attempts, 3);
    assert_eq!(cfg.slideshow.dwell, Duration::from_secs(5));
    assert_eq!(cfg.slideshow.order, OrderPolicy::Insertion);
}

#[test]
fn parse_humantime_durations() {
    let yaml = r#"
uploader:
  retry-initial-delay: 2s
  retry-max-delay: 1m
  scan-interval: 30s
  quiet-period: 500ms
slideshow:
  dwell: 8s
  recent-window: 48h
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.uploader.retry_initial_delay, Duration::from_secs(2));
    assert_eq!(cfg.uploader.retry_max_delay, Duration::from_secs(60));
    assert_eq!(cfg.uploader.scan_interval, Duration::from_secs(30));
    assert_eq!(cfg.uploader.quiet_period, Duration::from_millis(500));
    assert_eq!(cfg.slideshow.dwell, Duration::from_secs(8));
    assert_eq!(
        cfg.slideshow.recent_window,
        Duration::from_secs(48 * 60 * 60)
    );
}

#[test]
fn display_mode_maps_from_config_names() {
    let yaml = r#"
slideshow:
  mode: current-only
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.slideshow.mode, FeedModeConfig::CurrentOnly);
    assert_eq!(
        cfg.slideshow.display_mode(),
        DisplayMode::CurrentlyUploadingOnly
    );

    let yaml = r#"
slideshow:
  mode: recent
  recent-window: 1h
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(
        cfg.slideshow.display_mode(),
        DisplayMode::RecentWindow(Duration::from_secs(3600))
    );
}

#[test]
fn parse_upload_command_and_order() {
    let yaml = r#"
uploader:
  command:
    program: "/usr/local/bin/gp-upload"
    args: ["--token-only", "--album", "Photo Courier"]
    terminal-exit-code: 4
slideshow:
  order: random
  startup-shuffle-seed: 7
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(
        cfg.uploader.command.program,
        PathBuf::from("/usr/local/bin/gp-upload")
    );
    assert_eq!(cfg.uploader.command.args.len(), 3);
    assert_eq!(cfg.uploader.command.terminal_exit_code, 4);
    assert_eq!(cfg.slideshow.order, OrderPolicy::Random);
    assert_eq!(cfg.slideshow.startup_shuffle_seed, Some(7));
}

#[test]
fn validation_rejects_zero_workers() {
    let yaml = r#"
uploader:
  workers: 0
  command:
    program: "/bin/true"
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let err = cfg.validated().unwrap_err();
    assert!(err.to_string().contains("uploader.workers"));
}

#[test]
fn validation_requires_an_upload_command() {
    let yaml = r#"
volume:
  name: "Untitled"
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let err = cfg.validated().unwrap_err();
    assert!(err.to_string().contains("uploader.command.program"));
}

#[test]
fn valid_config_passes_validation() {
    let yaml = r#"
volume:
  name: "Untitled"
uploader:
  command:
    program: "/usr/local/bin/gp-upload"
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert!(cfg.validated().is_ok());
}
