use std::path::PathBuf;

use thiserror::Error;

use crate::cache::infrastructure::persistent_cache::CacheError;
use crate::profiles::domain::directory_watcher::WatchError;

/// Failures that stop a stage or session from starting. Everything that
/// happens after start is logged by the stage and never surfaces here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{stage} was already stopped and cannot be restarted")]
    Stopped { stage: &'static str },
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to create {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Spawns a named stage thread.
pub(crate) fn spawn_named<F>(
    name: &'static str,
    body: F,
) -> Result<std::thread::JoinHandle<()>, PipelineError>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|source| PipelineError::Spawn { name, source })
}

/// Joins a stage thread, logging instead of propagating a panic.
pub(crate) fn join_logged(name: &str, handle: std::thread::JoinHandle<()>) {
    if handle.join().is_err() {
        log::error!("{name} thread panicked");
    }
}
