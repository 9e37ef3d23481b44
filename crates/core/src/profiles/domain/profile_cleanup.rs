use std::path::{Path, PathBuf};

/// Removes unusable images from a profile directory before encoding.
pub trait ProfileCleanup: Send {
    /// Returns the files that were removed.
    fn cleanup(&mut self, dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>>;
}
