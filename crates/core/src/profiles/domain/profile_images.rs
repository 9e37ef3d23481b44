use std::io;
use std::path::{Path, PathBuf};

use crate::shared::constants::is_image_path;

/// Image files directly inside `dir`, sorted by path.
pub fn list_images(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_image_path(path))
        .collect();
    images.sort();
    Ok(images)
}
