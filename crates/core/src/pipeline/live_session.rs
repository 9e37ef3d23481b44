use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::infrastructure::persistent_cache::PersistentCache;
use crate::pipeline::capture_display::{CaptureDisplayConfig, CaptureDisplayPipeline};
use crate::pipeline::clustering_stage::{ClusteringConfig, ClusteringStage};
use crate::pipeline::pipeline_error::PipelineError;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::pipeline::profile_watcher::{ProfileWatcher, WatcherConfig};
use crate::pipeline::recognition_stage::{RecognitionConfig, RecognitionStage};
use crate::profiles::domain::directory_watcher::DirectoryWatcher;
use crate::profiles::domain::profile_cleanup::ProfileCleanup;
use crate::profiles::domain::profile_encoder::ProfileEncoder;
use crate::recognition::domain::face_analyzer::FaceAnalyzer;
use crate::recognition::domain::face_matcher::FaceMatcher;
use crate::shared::stop_signal::StopSignal;
use crate::video::domain::camera_source::CameraSource;
use crate::video::domain::display_surface::DisplaySurface;

const SESSION_POLL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub watcher: WatcherConfig,
    pub cache_dir: PathBuf,
    pub capture: CaptureDisplayConfig,
    pub recognition: RecognitionConfig,
    pub clustering: ClusteringConfig,
}

impl SessionConfig {
    pub fn new(profile_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            watcher: WatcherConfig::new(profile_dir),
            cache_dir: cache_dir.into(),
            capture: CaptureDisplayConfig::default(),
            recognition: RecognitionConfig::default(),
            clustering: ClusteringConfig::default(),
        }
    }
}

/// External collaborators a session drives.
pub struct SessionDevices {
    pub camera: Box<dyn CameraSource>,
    pub display: Box<dyn DisplaySurface>,
    /// Analyzer owned by the recognition thread.
    pub analyzer: Box<dyn FaceAnalyzer>,
    pub matcher: Arc<dyn FaceMatcher>,
    pub cleanup: Box<dyn ProfileCleanup>,
    pub encoder: Box<dyn ProfileEncoder>,
    pub directory_watcher: Box<dyn DirectoryWatcher>,
}

/// Optional per-stage loggers.
#[derive(Default)]
pub struct SessionLoggers {
    pub display: Option<Box<dyn PipelineLogger>>,
    pub recognition: Option<Box<dyn PipelineLogger>>,
}

/// All stages of a live recognition session, wired to one stop signal.
pub struct LiveSession {
    stop: StopSignal,
    capture: CaptureDisplayPipeline,
    recognition: RecognitionStage,
    clustering: ClusteringStage,
    watcher: ProfileWatcher,
}

impl LiveSession {
    /// Creates the profile and cache directories and builds every stage.
    pub fn new(
        config: SessionConfig,
        devices: SessionDevices,
        loggers: SessionLoggers,
    ) -> Result<Self, PipelineError> {
        let profile_dir = &config.watcher.profile_dir;
        std::fs::create_dir_all(profile_dir).map_err(|source| PipelineError::Setup {
            path: profile_dir.clone(),
            source,
        })?;
        let cache = Arc::new(PersistentCache::open(&config.cache_dir)?);

        let stop = StopSignal::new();
        let mut capture =
            CaptureDisplayPipeline::new(devices.camera, devices.display, config.capture, &stop);
        if let Some(logger) = loggers.display {
            capture = capture.with_logger(logger);
        }

        let clustering = ClusteringStage::new(config.clustering, cache, &stop);
        let mut recognition = RecognitionStage::new(
            devices.analyzer,
            devices.matcher,
            capture.frame_buffer(),
            capture.overlay_buffer(),
            Some(clustering.clone()),
            config.recognition,
            &stop,
        );
        if let Some(logger) = loggers.recognition {
            recognition = recognition.with_logger(logger);
        }

        let watcher = ProfileWatcher::new(
            config.watcher,
            devices.directory_watcher,
            devices.cleanup,
            devices.encoder,
            recognition.clone(),
            clustering.clone(),
            &stop,
        );

        Ok(Self {
            stop,
            capture,
            recognition,
            clustering,
            watcher,
        })
    }

    /// Signal that ends the session when set, e.g. from a Ctrl-C handler.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn recognition(&self) -> &RecognitionStage {
        &self.recognition
    }

    pub fn clustering(&self) -> &ClusteringStage {
        &self.clustering
    }

    /// Starts clustering, recognition, the profile watcher and the video
    /// stage in that order.
    ///
    /// If any stage fails to start, the ones already running are stopped
    /// and the error is returned.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        let started = self
            .clustering
            .start()
            .and_then(|()| self.recognition.start())
            .and_then(|()| self.watcher.start())
            .and_then(|()| self.capture.start());
        if let Err(e) = started {
            log::error!("Session failed to start: {e}");
            self.stop.set();
            self.shutdown();
            return Err(e);
        }
        log::info!("Session running");
        Ok(())
    }

    /// Starts every stage, blocks until the stop signal is set, then stops
    /// every stage.
    pub fn run(&mut self) -> Result<(), PipelineError> {
        self.start()?;
        while !self.stop.wait_timeout(SESSION_POLL) {}
        self.shutdown();
        log::info!("Session ended");
        Ok(())
    }

    /// Sets the stop signal and joins every stage. Idempotent.
    pub fn stop(&mut self) {
        self.stop.set();
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.capture.stop();
        self.watcher.stop();
        self.recognition.stop();
        self.clustering.stop();
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.stop();
    }
}
