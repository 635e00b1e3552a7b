//! Errors raised while installing watches or driving the reload worker.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to start the file watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch directory {path}: {reason}\nRealtime reload stays off for this manager")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Failed to spawn the {thread} thread: {reason}")]
    SpawnFailed { thread: &'static str, reason: String },

    #[error("Watcher or reload worker has already shut down")]
    ChannelClosed,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
