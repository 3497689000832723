use std::path::PathBuf;

use thiserror::Error;

/// Library error type for photo-courier operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The upload ledger exists on disk but cannot be replayed. Fatal at
    /// startup; the ledger is never silently reset.
    #[error("corrupt ledger {}: line {}: {}", .path.display(), .line, .reason)]
    CorruptLedger {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
