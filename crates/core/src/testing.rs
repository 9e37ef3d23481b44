//! In-memory fakes of the port traits, shared by unit tests across contexts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::profiles::domain::directory_watcher::{DirectoryWatcher, ProfileEvent, WatchError};
use crate::profiles::domain::profile_cleanup::ProfileCleanup;
use crate::profiles::domain::profile_encoder::ProfileEncoder;
use crate::recognition::domain::face_analyzer::FaceAnalyzer;
use crate::recognition::domain::face_encoding::FaceEncoding;
use crate::shared::frame::Frame;
use crate::shared::region::FaceRegion;
use crate::video::domain::camera_source::CameraSource;
use crate::video::domain::display_surface::DisplaySurface;

pub(crate) fn write_checkerboard(path: &Path, size: u32, cell: u32) {
    let img = image::RgbImage::from_fn(size, size, |x, y| {
        let v = if (x / cell + y / cell) % 2 == 0 { 0 } else { 255 };
        image::Rgb([v, v, v])
    });
    img.save(path).unwrap();
}

pub(crate) fn write_solid(path: &Path, size: u32, value: u8) {
    image::RgbImage::from_pixel(size, size, image::Rgb([value, value, value]))
        .save(path)
        .unwrap();
}

#[derive(Clone, Copy)]
enum Detection {
    WholeFrame,
    Nothing,
    Fail,
    Panic,
}

/// Detects one face covering the whole frame (or none, or fails, or panics).
///
/// Encodings are `[mean_luma / 255, 1.0]` unless a fixed vector is set.
pub(crate) struct StubAnalyzer {
    detection: Detection,
    encoding: Option<Vec<f32>>,
    calls: Arc<AtomicUsize>,
}

impl StubAnalyzer {
    pub(crate) fn always_one_face() -> Self {
        Self::with(Detection::WholeFrame)
    }

    pub(crate) fn no_faces() -> Self {
        Self::with(Detection::Nothing)
    }

    pub(crate) fn failing() -> Self {
        Self::with(Detection::Fail)
    }

    pub(crate) fn panicking() -> Self {
        Self::with(Detection::Panic)
    }

    pub(crate) fn encoding(mut self, vector: Vec<f32>) -> Self {
        self.encoding = Some(vector);
        self
    }

    /// Counts `detect` calls.
    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn with(detection: Detection) -> Self {
        Self {
            detection,
            encoding: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FaceAnalyzer for StubAnalyzer {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, Box<dyn std::error::Error>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.detection {
            Detection::WholeFrame => Ok(vec![FaceRegion::new(
                0,
                0,
                frame.width() as i32,
                frame.height() as i32,
            )]),
            Detection::Nothing => Ok(Vec::new()),
            Detection::Fail => Err("detector unavailable".into()),
            Detection::Panic => panic!("output tensor has an unexpected shape"),
        }
    }

    fn encode(
        &mut self,
        frame: &Frame,
        regions: &[FaceRegion],
    ) -> Result<Vec<Vec<f32>>, Box<dyn std::error::Error>> {
        let vector = match &self.encoding {
            Some(v) => v.clone(),
            None => {
                let data = frame.data();
                let mean = if data.is_empty() {
                    0.0
                } else {
                    data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
                };
                vec![mean / 255.0, 1.0]
            }
        };
        Ok(vec![vector; regions.len()])
    }
}

/// Produces black frames with increasing indices, optionally failing every
/// `fail_every`-th read.
pub(crate) struct ScriptedCamera {
    width: u32,
    height: u32,
    fail_open: bool,
    fail_every: Option<usize>,
    reads: Arc<AtomicUsize>,
    produced: usize,
}

impl ScriptedCamera {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fail_open: false,
            fail_every: None,
            reads: Arc::new(AtomicUsize::new(0)),
            produced: 0,
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::new(8, 8)
        }
    }

    pub(crate) fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    pub(crate) fn reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl CameraSource for ScriptedCamera {
    fn open(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if self.fail_open {
            return Err("no such device".into());
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, Box<dyn std::error::Error>> {
        // Roughly camera pace so tests do not spin a core.
        std::thread::sleep(Duration::from_millis(2));
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every.is_some_and(|every| n % every == 0) {
            return Err("dropped frame".into());
        }
        self.produced += 1;
        Ok(Frame::black(self.width, self.height, self.produced))
    }

    fn close(&mut self) {}
}

/// Keeps every rendered frame. Requests a quit or reports itself closed
/// after a number of renders.
pub(crate) struct RecordingDisplay {
    frames: Arc<Mutex<Vec<Frame>>>,
    quit_after: Option<usize>,
    close_after: Option<usize>,
    fail_renders: bool,
}

impl RecordingDisplay {
    pub(crate) fn new() -> Self {
        Self {
            frames: Arc::new(Mutex::new(Vec::new())),
            quit_after: None,
            close_after: None,
            fail_renders: false,
        }
    }

    pub(crate) fn quit_after(mut self, renders: usize) -> Self {
        self.quit_after = Some(renders);
        self
    }

    pub(crate) fn close_after(mut self, renders: usize) -> Self {
        self.close_after = Some(renders);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail_renders = true;
        self
    }

    pub(crate) fn frames(&self) -> Arc<Mutex<Vec<Frame>>> {
        Arc::clone(&self.frames)
    }

    fn rendered(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl DisplaySurface for RecordingDisplay {
    fn render(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());
        if self.fail_renders {
            return Err("surface lost".into());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.close_after.map_or(true, |n| self.rendered() < n)
    }

    fn quit_requested(&mut self) -> bool {
        self.quit_after.is_some_and(|n| self.rendered() >= n)
    }
}

/// Removes nothing; counts runs and can stall each one.
pub(crate) struct CountingCleanup {
    runs: Arc<AtomicUsize>,
    delay: Duration,
}

impl CountingCleanup {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            runs: Arc::new(AtomicUsize::new(0)),
            delay,
        }
    }

    pub(crate) fn runs(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }
}

impl ProfileCleanup for CountingCleanup {
    fn cleanup(&mut self, _dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(Vec::new())
    }
}

/// Encodes any file whose stem does not start with `noface` into a vector
/// derived from its file length, named after the stem. Stems starting with
/// `broken` fail.
pub(crate) struct StemEncoder;

impl ProfileEncoder for StemEncoder {
    fn encode_file(&mut self, path: &Path) -> Result<Option<FaceEncoding>, Box<dyn std::error::Error>> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem.starts_with("broken") {
            return Err(format!("cannot decode {stem}").into());
        }
        if stem.starts_with("noface") {
            return Ok(None);
        }
        let len = std::fs::metadata(path)?.len() as f32;
        Ok(Some(FaceEncoding::new(vec![len, 1.0], stem)))
    }
}

/// Directory watcher whose events are injected by the test.
pub(crate) struct InjectedWatcher {
    sink: Arc<Mutex<Option<Sender<ProfileEvent>>>>,
}

impl InjectedWatcher {
    pub(crate) fn new() -> Self {
        Self {
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn injector(&self) -> EventInjector {
        EventInjector {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl DirectoryWatcher for InjectedWatcher {
    fn watch(&mut self, dir: &Path, sink: Sender<ProfileEvent>) -> Result<(), WatchError> {
        if !dir.is_dir() {
            return Err(WatchError::MissingDirectory(dir.to_path_buf()));
        }
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(())
    }

    fn unwatch(&mut self) {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

#[derive(Clone)]
pub(crate) struct EventInjector {
    sink: Arc<Mutex<Option<Sender<ProfileEvent>>>>,
}

impl EventInjector {
    pub(crate) fn send(&self, event: ProfileEvent) {
        if let Some(sink) = self.sink.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            let _ = sink.send(event);
        }
    }
}
