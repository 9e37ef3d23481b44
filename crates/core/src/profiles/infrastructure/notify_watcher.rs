use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use notify::event::{CreateKind, EventKind, RemoveKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::profiles::domain::directory_watcher::{
    DirectoryWatcher, ProfileEvent, ProfileEventKind, WatchError,
};

/// [`DirectoryWatcher`] on the platform's native notification backend.
pub struct NotifyDirectoryWatcher {
    active: Option<(RecommendedWatcher, PathBuf)>,
}

impl NotifyDirectoryWatcher {
    pub fn new() -> Self {
        Self { active: None }
    }
}

impl Default for NotifyDirectoryWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryWatcher for NotifyDirectoryWatcher {
    fn watch(&mut self, dir: &Path, sink: Sender<ProfileEvent>) -> Result<(), WatchError> {
        if !dir.is_dir() {
            return Err(WatchError::MissingDirectory(dir.to_path_buf()));
        }
        self.unwatch();

        let subscribe_err = |e: notify::Error| WatchError::Subscribe {
            path: dir.to_path_buf(),
            message: e.to_string(),
        };
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for profile_event in translate(&event) {
                        // The receiver is gone once the watcher is shutting down.
                        if sink.send(profile_event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => log::warn!("Profile directory notification error: {e}"),
            }
        })
        .map_err(subscribe_err)?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(subscribe_err)?;

        log::debug!("Watching {}", dir.display());
        self.active = Some((watcher, dir.to_path_buf()));
        Ok(())
    }

    fn unwatch(&mut self) {
        if let Some((mut watcher, dir)) = self.active.take() {
            if let Err(e) = watcher.unwatch(&dir) {
                log::debug!("Unwatching {} failed: {e}", dir.display());
            }
        }
    }
}

impl Drop for NotifyDirectoryWatcher {
    fn drop(&mut self) {
        self.unwatch();
    }
}

/// Maps a backend event onto one [`ProfileEvent`] per path. Access events
/// are dropped: reading a profile must not look like changing it.
fn translate(event: &notify::Event) -> Vec<ProfileEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => ProfileEventKind::Created,
        EventKind::Modify(_) => ProfileEventKind::Modified,
        EventKind::Remove(_) => ProfileEventKind::Removed,
        EventKind::Any | EventKind::Other => ProfileEventKind::Other,
        EventKind::Access(_) => return Vec::new(),
    };
    let folder_kind = matches!(
        event.kind,
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder)
    );
    event
        .paths
        .iter()
        .map(|path| ProfileEvent {
            kind,
            path: path.clone(),
            is_dir: folder_kind || path.is_dir(),
        })
        .collect()
}
