use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::pipeline::clustering_stage::ClusteringStage;
use crate::pipeline::pipeline_error::{join_logged, spawn_named, PipelineError};
use crate::pipeline::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use crate::recognition::domain::face_analyzer::FaceAnalyzer;
use crate::recognition::domain::face_encoding::{KnownFaceSet, RecognitionError};
use crate::recognition::domain::face_matcher::FaceMatcher;
use crate::shared::bounded_queue::BoundedLatestQueue;
use crate::shared::constants::{
    GROUPED_FACE_COLOR, KNOWN_FACE_COLOR, POP_TIMEOUT, RECOGNITION_TOLERANCE, TEXT_COLOR,
    UNKNOWN_FACE_COLOR, UNKNOWN_LABEL,
};
use crate::shared::frame::Frame;
use crate::shared::overlay::Overlay;
use crate::shared::stop_signal::StopSignal;

#[derive(Clone, Debug)]
pub struct RecognitionConfig {
    /// Tolerance handed to the matcher when the session builds one.
    pub tolerance: f64,
    pub pop_timeout: Duration,
    pub box_thickness: i32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            tolerance: RECOGNITION_TOLERANCE,
            pop_timeout: POP_TIMEOUT,
            box_thickness: 2,
        }
    }
}

/// What a detected face was recognized as.
#[derive(Clone, Debug, PartialEq)]
pub enum FaceLabel {
    Known { name: String, confidence: f64 },
    /// No known face matched but an unlabeled group is close.
    Grouped(String),
    Unknown,
}

impl FaceLabel {
    pub fn text(&self) -> String {
        match self {
            FaceLabel::Known { name, confidence } => {
                format!("{name} ({:.0}%)", confidence * 100.0)
            }
            FaceLabel::Grouped(group) => group.clone(),
            FaceLabel::Unknown => UNKNOWN_LABEL.to_string(),
        }
    }

    pub fn color(&self) -> [u8; 3] {
        match self {
            FaceLabel::Known { .. } => KNOWN_FACE_COLOR,
            FaceLabel::Grouped(_) => GROUPED_FACE_COLOR,
            FaceLabel::Unknown => UNKNOWN_FACE_COLOR,
        }
    }
}

struct Workers {
    analyzer: Box<dyn FaceAnalyzer>,
    logger: Box<dyn PipelineLogger>,
}

struct Inner {
    config: RecognitionConfig,
    matcher: Arc<dyn FaceMatcher>,
    clustering: Option<ClusteringStage>,
    known: Mutex<Arc<KnownFaceSet>>,
    generation: AtomicU64,
    frames: Arc<BoundedLatestQueue<Frame>>,
    overlays: Arc<BoundedLatestQueue<Overlay>>,
    stop: StopSignal,
    pending: Mutex<Option<Workers>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Detects and identifies faces on the most recent frame and publishes an
/// overlay for the display.
///
/// The stage never works through a backlog: each cycle first discards all
/// but the newest buffered frame. Clones share the same state, so the
/// profile watcher can replace the known faces while the stage runs.
#[derive(Clone)]
pub struct RecognitionStage {
    inner: Arc<Inner>,
}

impl RecognitionStage {
    pub fn new(
        analyzer: Box<dyn FaceAnalyzer>,
        matcher: Arc<dyn FaceMatcher>,
        frames: Arc<BoundedLatestQueue<Frame>>,
        overlays: Arc<BoundedLatestQueue<Overlay>>,
        clustering: Option<ClusteringStage>,
        config: RecognitionConfig,
        global: &StopSignal,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                matcher,
                clustering,
                known: Mutex::new(Arc::new(KnownFaceSet::empty())),
                generation: AtomicU64::new(0),
                frames,
                overlays,
                stop: global.child(),
                pending: Mutex::new(Some(Workers {
                    analyzer,
                    logger: Box::new(NullPipelineLogger),
                })),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Replaces the logger used by the stage thread. Has no effect once
    /// the stage is started.
    pub fn with_logger(self, logger: Box<dyn PipelineLogger>) -> Self {
        if let Some(workers) = lock(&self.inner.pending).as_mut() {
            workers.logger = logger;
        }
        self
    }

    /// Atomically replaces every known face. `encodings[i]` belongs to
    /// `names[i]`.
    ///
    /// On error the current set is left untouched.
    pub fn update_known_faces(
        &self,
        encodings: Vec<Vec<f32>>,
        names: Vec<String>,
    ) -> Result<(), RecognitionError> {
        let mut known = lock(&self.inner.known);
        let generation = self.inner.generation.load(Ordering::SeqCst) + 1;
        let set = KnownFaceSet::from_parallel(encodings, names, generation)?;
        let count = set.len();
        *known = Arc::new(set);
        self.inner.generation.store(generation, Ordering::SeqCst);
        drop(known);
        log::info!("Known faces updated: {count} encodings (generation {generation})");
        Ok(())
    }

    /// Snapshot of the current known faces.
    pub fn known_faces(&self) -> Arc<KnownFaceSet> {
        Arc::clone(&lock(&self.inner.known))
    }

    /// Labels one encoding: a known face if the matcher accepts one, else
    /// the nearest cluster group, else unknown.
    pub fn identify(&self, encoding: &[f32]) -> FaceLabel {
        self.inner.identify(&self.known_faces(), encoding)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.handle).is_some()
    }

    /// Spawns the recognition thread. Does nothing if it is running.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut handle = lock(&self.inner.handle);
        if handle.is_some() {
            return Ok(());
        }
        let Workers { analyzer, logger } = lock(&self.inner.pending)
            .take()
            .ok_or(PipelineError::Stopped { stage: "recognition" })?;
        let inner = Arc::clone(&self.inner);
        *handle = Some(spawn_named("recognition", move || {
            inner.run(analyzer, logger)
        })?);
        log::info!("Recognition started");
        Ok(())
    }

    /// Stops the recognition thread and waits for it. Idempotent.
    pub fn stop(&self) {
        self.inner.stop.set();
        let handle = lock(&self.inner.handle).take();
        if let Some(handle) = handle {
            join_logged("recognition", handle);
        }
    }
}

impl Inner {
    fn run(&self, mut analyzer: Box<dyn FaceAnalyzer>, mut logger: Box<dyn PipelineLogger>) {
        while !self.stop.is_set() {
            let skipped = self.frames.try_drain_to_one();
            if skipped > 0 {
                logger.metric("skipped_frames", skipped as f64);
            }
            let Some(frame) = self.frames.pop(self.config.pop_timeout) else {
                continue;
            };
            // A panicking analyzer costs one frame, not the stage.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.recognize(analyzer.as_mut(), &frame, logger.as_mut())
            }));
            match outcome {
                Ok(Ok(overlay)) => {
                    self.overlays.try_drain_to_one();
                    self.overlays.push(overlay);
                    logger.frame();
                }
                Ok(Err(e)) => log::warn!("Recognition skipped frame {}: {e}", frame.index()),
                Err(_) => log::error!("Analyzer panicked on frame {}, skipped", frame.index()),
            }
        }
        logger.summary();
        log::info!("Recognition stopped");
    }

    fn recognize(
        &self,
        analyzer: &mut dyn FaceAnalyzer,
        frame: &Frame,
        logger: &mut dyn PipelineLogger,
    ) -> Result<Overlay, Box<dyn std::error::Error>> {
        let mut overlay = Overlay::transparent(frame.width(), frame.height(), frame.index());

        let t0 = Instant::now();
        let regions = analyzer.detect(frame)?;
        logger.timing("detect", elapsed_ms(t0));
        logger.metric("faces", regions.len() as f64);
        if regions.is_empty() {
            return Ok(overlay);
        }

        let t1 = Instant::now();
        let encodings = analyzer.encode(frame, &regions)?;
        logger.timing("encode", elapsed_ms(t1));
        if encodings.len() != regions.len() {
            return Err(format!(
                "analyzer returned {} encodings for {} faces",
                encodings.len(),
                regions.len()
            )
            .into());
        }

        let known = Arc::clone(&lock(&self.known));
        for (region, encoding) in regions.iter().zip(&encodings) {
            let label = self.identify(&known, encoding);
            overlay.draw_box(region, label.color(), self.config.box_thickness);
            overlay.draw_label(region, &label.text(), label.color(), TEXT_COLOR);
        }
        Ok(overlay)
    }

    fn identify(&self, known: &KnownFaceSet, encoding: &[f32]) -> FaceLabel {
        if let Some(m) = self.matcher.best_match(encoding, known.faces()) {
            return FaceLabel::Known {
                name: m.name,
                confidence: m.confidence,
            };
        }
        match &self.clustering {
            Some(clustering) => {
                let group = clustering.get_group_name(encoding);
                if group == UNKNOWN_LABEL {
                    FaceLabel::Unknown
                } else {
                    FaceLabel::Grouped(group)
                }
            }
            None => FaceLabel::Unknown,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
