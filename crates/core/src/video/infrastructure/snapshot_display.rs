use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::shared::frame::Frame;
use crate::video::domain::display_surface::DisplaySurface;

/// Headless display: writes every Nth composited frame to an image file.
///
/// Each snapshot is written next to the target and renamed over it, so a
/// viewer polling the file never reads a half-written image. Quit requests
/// arrive through a shared flag; the surface closes itself after an
/// optional frame limit.
pub struct SnapshotDisplay {
    path: PathBuf,
    every: u64,
    max_frames: Option<u64>,
    rendered: u64,
    quit: Arc<AtomicBool>,
    open: bool,
}

impl SnapshotDisplay {
    pub fn new(path: impl Into<PathBuf>, every: u64) -> Self {
        Self {
            path: path.into(),
            every: every.max(1),
            max_frames: None,
            rendered: 0,
            quit: Arc::new(AtomicBool::new(false)),
            open: true,
        }
    }

    /// Closes the surface after `max_frames` renders.
    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    /// Flag that requests a quit when set, e.g. from a keyboard reader.
    pub fn quit_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    fn write_snapshot(&self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let img = image::RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or("frame is not tightly packed RGB")?;

        let format = image::ImageFormat::from_path(&self.path).unwrap_or(image::ImageFormat::Png);
        let temp = self.path.with_extension("partial");
        if let Err(e) = img.save_with_format(&temp, format) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl DisplaySurface for SnapshotDisplay {
    fn render(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        if !self.open {
            return Err("display is closed".into());
        }
        let result = if self.rendered % self.every == 0 {
            self.write_snapshot(frame)
        } else {
            Ok(())
        };
        self.rendered += 1;
        if self.max_frames.is_some_and(|max| self.rendered >= max) {
            log::info!("Snapshot display reached its frame limit");
            self.open = false;
        }
        result
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn quit_requested(&mut self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Frame::new(data, width, height, 3, 0)
    }

    #[test]
    fn test_render_writes_readable_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.png");
        let mut display = SnapshotDisplay::new(&path, 1);
        display.render(&make_frame(20, 10, [50, 100, 200])).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (20, 10));
        assert_eq!(img.get_pixel(0, 0).0, [50, 100, 200]);
        assert!(!dir.path().join("live.partial").exists());
    }

    #[test]
    fn test_only_every_nth_frame_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.png");
        let mut display = SnapshotDisplay::new(&path, 3);
        display.render(&make_frame(4, 4, [1, 1, 1])).unwrap();
        display.render(&make_frame(4, 4, [200, 200, 200])).unwrap();
        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [1, 1, 1]);
        assert_eq!(display.rendered(), 2);
    }

    #[test]
    fn test_closes_after_frame_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut display = SnapshotDisplay::new(dir.path().join("s.png"), 10).with_max_frames(2);
        assert!(display.is_open());
        display.render(&make_frame(2, 2, [0, 0, 0])).unwrap();
        assert!(display.is_open());
        display.render(&make_frame(2, 2, [0, 0, 0])).unwrap();
        assert!(!display.is_open());
        assert!(display.render(&make_frame(2, 2, [0, 0, 0])).is_err());
    }

    #[test]
    fn test_quit_handle_requests_quit() {
        let mut display = SnapshotDisplay::new("unused.png", 1);
        assert!(!display.quit_requested());
        display.quit_handle().store(true, Ordering::Relaxed);
        assert!(display.quit_requested());
    }

    #[test]
    fn test_write_failure_is_reported_and_display_stays_open() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let mut display = SnapshotDisplay::new(blocker.join("s.png"), 1);
        assert!(display.render(&make_frame(2, 2, [0, 0, 0])).is_err());
        assert!(display.is_open());
    }
}
