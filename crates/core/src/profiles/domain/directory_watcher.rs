use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("profile directory {0} does not exist")]
    MissingDirectory(PathBuf),
    #[error("cannot watch {path}: {message}")]
    Subscribe { path: PathBuf, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileEventKind {
    Created,
    Modified,
    Removed,
    Other,
}

/// A change to one entry of the watched directory.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileEvent {
    pub kind: ProfileEventKind,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Subscribes to create/modify/delete notifications for one directory,
/// non-recursively.
pub trait DirectoryWatcher: Send {
    fn watch(&mut self, dir: &Path, sink: Sender<ProfileEvent>) -> Result<(), WatchError>;

    /// Stops delivering events. Safe to call when not watching.
    fn unwatch(&mut self);
}
