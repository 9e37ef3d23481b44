use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;

use crate::profiles::domain::image_inspector::ImageInspector;
use crate::profiles::domain::profile_cleanup::ProfileCleanup;
use crate::profiles::domain::profile_images::list_images;
use crate::recognition::domain::face_analyzer::SharedFaceAnalyzer;
use crate::shared::constants::IMAGE_QUALITY_THRESHOLD;
use crate::video::domain::image_reader::ImageReader;

/// Why a profile image was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    Invalid,
    LowQuality,
    Duplicate,
    NoFace,
}

/// Deletes profile images that are undecodable, below the quality
/// threshold, perceptual duplicates of an earlier file, or faceless.
///
/// Files are visited in name order, so of two duplicates the first name
/// survives. A detector failure keeps the file.
pub struct ProfileCleaner {
    reader: Box<dyn ImageReader>,
    inspector: Box<dyn ImageInspector>,
    analyzer: SharedFaceAnalyzer,
    quality_threshold: f64,
    remove_duplicates: bool,
}

impl ProfileCleaner {
    pub fn new(
        reader: Box<dyn ImageReader>,
        inspector: Box<dyn ImageInspector>,
        analyzer: SharedFaceAnalyzer,
    ) -> Self {
        Self {
            reader,
            inspector,
            analyzer,
            quality_threshold: IMAGE_QUALITY_THRESHOLD,
            remove_duplicates: true,
        }
    }

    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn with_duplicate_removal(mut self, enabled: bool) -> Self {
        self.remove_duplicates = enabled;
        self
    }

    /// Decides the fate of one file. `seen` maps perceptual hashes to the
    /// file that first produced them.
    fn inspect(&self, path: &Path, seen: &mut HashMap<String, PathBuf>) -> Option<Rejection> {
        if !self.inspector.is_valid_image(path) {
            return Some(Rejection::Invalid);
        }
        let frame = match self.reader.read(path) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("Cannot decode {}: {e}", path.display());
                return Some(Rejection::Invalid);
            }
        };

        let quality = self.inspector.assess_quality(&frame);
        if quality < self.quality_threshold {
            log::debug!("{} scored {quality:.1}", path.display());
            return Some(Rejection::LowQuality);
        }

        if self.remove_duplicates {
            let hash = self.inspector.perceptual_hash(&frame);
            if let Some(original) = seen.get(&hash) {
                log::debug!("{} duplicates {}", path.display(), original.display());
                return Some(Rejection::Duplicate);
            }
            seen.insert(hash, path.to_path_buf());
        }

        let detected = self
            .analyzer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect(&frame);
        match detected {
            Ok(regions) if regions.is_empty() => Some(Rejection::NoFace),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Face check failed for {}, keeping it: {e}", path.display());
                None
            }
        }
    }
}

impl ProfileCleanup for ProfileCleaner {
    fn cleanup(&mut self, dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
        let mut seen = HashMap::new();
        let mut removed = Vec::new();

        for path in list_images(dir)? {
            let Some(reason) = self.inspect(&path, &mut seen) else {
                continue;
            };
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    log::info!("Removed profile image {} ({reason:?})", path.display());
                    removed.push(path);
                }
                Err(e) => log::warn!("Failed to remove {}: {e}", path.display()),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::infrastructure::image_quality_inspector::ImageQualityInspector;
    use crate::testing::{write_checkerboard, write_solid, StubAnalyzer};
    use crate::video::infrastructure::image_file_reader::ImageFileReader;
    use std::sync::{Arc, Mutex};

    fn cleaner(analyzer: StubAnalyzer) -> ProfileCleaner {
        ProfileCleaner::new(
            Box::new(ImageFileReader::new()),
            Box::new(ImageQualityInspector::new()),
            Arc::new(Mutex::new(analyzer)),
        )
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_removes_invalid_low_quality_and_duplicate_images() {
        let dir = tempfile::tempdir().unwrap();
        write_checkerboard(&dir.path().join("alice.png"), 32, 4);
        write_checkerboard(&dir.path().join("alice_copy.png"), 32, 4);
        write_checkerboard(&dir.path().join("bob.png"), 32, 8);
        write_solid(&dir.path().join("dark.png"), 32, 0);
        std::fs::write(dir.path().join("broken.jpg"), b"not an image").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"ignored").unwrap();

        let removed = cleaner(StubAnalyzer::always_one_face()).cleanup(dir.path()).unwrap();

        assert_eq!(names(&removed), vec!["alice_copy.png", "broken.jpg", "dark.png"]);
        assert!(dir.path().join("alice.png").exists());
        assert!(dir.path().join("bob.png").exists());
        assert!(dir.path().join("readme.txt").exists());
    }

    #[test]
    fn test_removes_faceless_images() {
        let dir = tempfile::tempdir().unwrap();
        write_checkerboard(&dir.path().join("landscape.png"), 32, 4);
        let removed = cleaner(StubAnalyzer::no_faces()).cleanup(dir.path()).unwrap();
        assert_eq!(names(&removed), vec!["landscape.png"]);
    }

    #[test]
    fn test_detector_failure_keeps_image() {
        let dir = tempfile::tempdir().unwrap();
        write_checkerboard(&dir.path().join("alice.png"), 32, 4);
        let removed = cleaner(StubAnalyzer::failing()).cleanup(dir.path()).unwrap();
        assert!(removed.is_empty());
        assert!(dir.path().join("alice.png").exists());
    }

    #[test]
    fn test_duplicates_kept_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        write_checkerboard(&dir.path().join("a.png"), 32, 4);
        write_checkerboard(&dir.path().join("b.png"), 32, 4);
        let removed = cleaner(StubAnalyzer::always_one_face())
            .with_duplicate_removal(false)
            .cleanup(dir.path())
            .unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn test_missing_directory_is_error() {
        let mut c = cleaner(StubAnalyzer::always_one_face());
        assert!(c.cleanup(Path::new("/nonexistent/profiles")).is_err());
    }
}
