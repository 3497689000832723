//! The opaque cloud upload collaborator.
//!
//! The coordination core never speaks the photo service's protocol itself; it
//! hands a file to an [`UploadClient`] and gets back a remote id or a
//! classified failure. The production implementation delegates to an external
//! uploader command, which owns credentials and the wire protocol.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::ledger::RemoteId;

/// Upload failure taxonomy. Transient failures may succeed later and are
/// retried with backoff; terminal failures are abandoned.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("transient upload failure: {0}")]
    Transient(String),
    #[error("terminal upload failure: {0}")]
    Terminal(String),
}

impl UploadError {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Pushes one file to the cloud library. Called from blocking worker context;
/// implementations may block.
pub trait UploadClient: Send + Sync {
    fn upload(&self, path: &Path) -> Result<RemoteId, UploadError>;
}

/// Runs a configured external uploader command once per file.
///
/// Contract: the command receives the file path as its final argument, prints
/// the minted media id on stdout on success, and distinguishes permanent
/// rejections (unsupported format, revoked auth) with a dedicated exit code.
pub struct CommandUploader {
    program: PathBuf,
    args: Vec<String>,
    terminal_exit_code: i32,
}

impl CommandUploader {
    #[must_use]
    pub fn new(program: PathBuf, args: Vec<String>, terminal_exit_code: i32) -> Self {
        Self {
            program,
            args,
            terminal_exit_code,
        }
    }
}

impl UploadClient for CommandUploader {
    fn upload(&self, path: &Path) -> Result<RemoteId, UploadError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .map_err(|err| {
                UploadError::Transient(format!(
                    "spawning {}: {err}",
                    self.program.display()
                ))
            })?;

        if output.status.success() {
            let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if id.is_empty() {
                return Err(UploadError::Transient(
                    "uploader exited cleanly but produced no media id".into(),
                ));
            }
            return Ok(RemoteId(id));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            format!("uploader exited with {}", output.status)
        } else {
            stderr
        };
        if output.status.code() == Some(self.terminal_exit_code) {
            Err(UploadError::Terminal(detail))
        } else {
            Err(UploadError::Transient(detail))
        }
    }
}
