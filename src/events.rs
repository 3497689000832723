use std::path::PathBuf;

use crate::identity::FileIdentity;
use crate::ledger::RemoteId;

/// Progress notifications emitted by the upload pipeline. The live feed
/// consumes these to move entries through their state machine; observers
/// (status surface, tests) may listen on a side channel.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    AttemptStarted {
        identity: FileIdentity,
    },
    Completed {
        identity: FileIdentity,
        remote_id: RemoteId,
    },
    Failed {
        identity: FileIdentity,
        message: String,
        terminal: bool,
    },
}

/// Next image for the external renderer to put on screen.
#[derive(Debug, Clone)]
pub struct FrameRequest(pub PathBuf);
