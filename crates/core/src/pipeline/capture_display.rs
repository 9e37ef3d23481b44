use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::pipeline::pipeline_error::{join_logged, spawn_named, PipelineError};
use crate::pipeline::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use crate::shared::bounded_queue::BoundedLatestQueue;
use crate::shared::constants::{
    FRAME_BUFFER_DEPTH, OVERLAY_ALPHA, OVERLAY_BUFFER_DEPTH, OVERLAY_MAX_AGE, POP_TIMEOUT,
    TEXT_COLOR,
};
use crate::shared::frame::Frame;
use crate::shared::overlay::{stamp_text, Overlay};
use crate::shared::stop_signal::StopSignal;
use crate::video::domain::camera_source::CameraSource;
use crate::video::domain::display_surface::DisplaySurface;

const FPS_WINDOW: Duration = Duration::from_secs(1);
const FPS_TEXT_SCALE: u32 = 2;
const FPS_TEXT_MARGIN: i32 = 10;

#[derive(Clone, Debug)]
pub struct CaptureDisplayConfig {
    pub frame_buffer_depth: usize,
    pub overlay_buffer_depth: usize,
    /// How long the display waits for a frame before re-checking the stop
    /// signal.
    pub pop_timeout: Duration,
    pub overlay_alpha: f32,
    /// Overlays older than this are no longer drawn.
    pub overlay_max_age: Duration,
    pub show_fps: bool,
}

impl Default for CaptureDisplayConfig {
    fn default() -> Self {
        Self {
            frame_buffer_depth: FRAME_BUFFER_DEPTH,
            overlay_buffer_depth: OVERLAY_BUFFER_DEPTH,
            pop_timeout: POP_TIMEOUT,
            overlay_alpha: OVERLAY_ALPHA,
            overlay_max_age: OVERLAY_MAX_AGE,
            show_fps: true,
        }
    }
}

struct Devices {
    camera: Box<dyn CameraSource>,
    display: Box<dyn DisplaySurface>,
    logger: Box<dyn PipelineLogger>,
}

/// The video stage: a capture thread feeding the frame buffer and a display
/// thread that composites the latest overlay onto the newest frame.
///
/// A quit request or a closed surface sets the global stop signal, which
/// ends every stage of the session.
pub struct CaptureDisplayPipeline {
    config: CaptureDisplayConfig,
    frames: Arc<BoundedLatestQueue<Frame>>,
    overlays: Arc<BoundedLatestQueue<Overlay>>,
    global: StopSignal,
    stop: StopSignal,
    devices: Option<Devices>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
    dropped_frames: Arc<AtomicU64>,
}

impl CaptureDisplayPipeline {
    pub fn new(
        camera: Box<dyn CameraSource>,
        display: Box<dyn DisplaySurface>,
        config: CaptureDisplayConfig,
        global: &StopSignal,
    ) -> Self {
        Self {
            frames: Arc::new(BoundedLatestQueue::drop_oldest(config.frame_buffer_depth)),
            overlays: Arc::new(BoundedLatestQueue::drop_oldest(config.overlay_buffer_depth)),
            config,
            global: global.clone(),
            stop: global.child(),
            devices: Some(Devices {
                camera,
                display,
                logger: Box::new(NullPipelineLogger),
            }),
            handles: Vec::new(),
            dropped_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        if let Some(devices) = self.devices.as_mut() {
            devices.logger = logger;
        }
        self
    }

    /// Buffer the capture thread fills. Recognition consumes from it too.
    pub fn frame_buffer(&self) -> Arc<BoundedLatestQueue<Frame>> {
        Arc::clone(&self.frames)
    }

    /// Buffer recognition publishes overlays into.
    pub fn overlay_buffer(&self) -> Arc<BoundedLatestQueue<Overlay>> {
        Arc::clone(&self.overlays)
    }

    /// Frames evicted from the frame buffer so far.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Opens the camera and spawns the capture and display threads.
    ///
    /// A camera that cannot be opened is fatal. Calling `start` on a running
    /// pipeline does nothing.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.is_running() {
            return Ok(());
        }
        let Devices {
            mut camera,
            display,
            logger,
        } = self.devices.take().ok_or(PipelineError::Stopped {
            stage: "capture/display",
        })?;

        camera
            .open()
            .map_err(|e| PipelineError::CameraUnavailable(e.to_string()))?;
        log::info!("Camera opened");

        let capture = {
            let frames = Arc::clone(&self.frames);
            let stop = self.stop.clone();
            let dropped = Arc::clone(&self.dropped_frames);
            spawn_named("capture", move || run_capture(camera, &frames, &stop, &dropped))?
        };

        let display_loop = DisplayLoop {
            config: self.config.clone(),
            frames: Arc::clone(&self.frames),
            overlays: Arc::clone(&self.overlays),
            global: self.global.clone(),
            stop: self.stop.clone(),
            dropped: Arc::clone(&self.dropped_frames),
            display,
            logger,
            cached_overlay: None,
            fps: FpsMeter::new(),
        };
        let display = match spawn_named("display", move || display_loop.run()) {
            Ok(handle) => handle,
            Err(e) => {
                self.stop.set();
                join_logged("capture", capture);
                return Err(e);
            }
        };

        self.handles.push(("capture", capture));
        self.handles.push(("display", display));
        Ok(())
    }

    /// Stops both threads and waits for them. Idempotent.
    pub fn stop(&mut self) {
        self.stop.set();
        for (name, handle) in self.handles.drain(..) {
            join_logged(name, handle);
        }
    }
}

impl Drop for CaptureDisplayPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture(
    mut camera: Box<dyn CameraSource>,
    frames: &BoundedLatestQueue<Frame>,
    stop: &StopSignal,
    dropped: &AtomicU64,
) {
    let mut misses: u64 = 0;
    while !stop.is_set() {
        match camera.read_frame() {
            Ok(frame) => {
                let evicted = frames.push(frame);
                if evicted > 0 {
                    dropped.fetch_add(evicted as u64, Ordering::Relaxed);
                }
            }
            Err(e) => {
                misses += 1;
                log::debug!("Frame capture failed ({misses} so far): {e}");
                std::thread::yield_now();
            }
        }
    }
    camera.close();
    log::info!("Capture stopped ({misses} missed reads)");
}

struct DisplayLoop {
    config: CaptureDisplayConfig,
    frames: Arc<BoundedLatestQueue<Frame>>,
    overlays: Arc<BoundedLatestQueue<Overlay>>,
    global: StopSignal,
    stop: StopSignal,
    dropped: Arc<AtomicU64>,
    display: Box<dyn DisplaySurface>,
    logger: Box<dyn PipelineLogger>,
    cached_overlay: Option<Overlay>,
    fps: FpsMeter,
}

impl DisplayLoop {
    fn run(mut self) {
        while !self.stop.is_set() {
            let Some(mut frame) = self.frames.pop(self.config.pop_timeout) else {
                continue;
            };
            if let Some(newer) = self.frames.take_latest() {
                frame = newer;
            }

            self.composite(&mut frame);
            let fps = self.fps.tick();
            if self.config.show_fps {
                stamp_text(
                    &mut frame,
                    FPS_TEXT_MARGIN,
                    FPS_TEXT_MARGIN,
                    &format!("FPS: {fps:.1}"),
                    TEXT_COLOR,
                    FPS_TEXT_SCALE,
                );
            }

            let t0 = Instant::now();
            if let Err(e) = self.display.render(&frame) {
                log::warn!("Render failed for frame {}: {e}", frame.index());
            }
            self.logger.timing("render", t0.elapsed().as_secs_f64() * 1000.0);
            self.logger.metric("fps", fps);
            self.logger
                .metric("dropped_frames", self.dropped.load(Ordering::Relaxed) as f64);
            self.logger.frame();

            if self.display.quit_requested() {
                log::info!("Quit requested");
                self.global.set();
                break;
            }
            if !self.display.is_open() {
                log::info!("Display closed");
                self.global.set();
                break;
            }
        }
        self.display.close();
        self.logger.summary();
    }

    /// Blends the most recent overlay onto `frame`. The last overlay is
    /// reused until a newer one arrives or it exceeds the maximum age.
    fn composite(&mut self, frame: &mut Frame) {
        if let Some(latest) = self.overlays.take_latest() {
            self.cached_overlay = Some(latest);
        }
        let max_age = self.config.overlay_max_age;
        if self.cached_overlay.as_ref().is_some_and(|o| o.age() > max_age) {
            self.cached_overlay = None;
        }
        let Some(overlay) = &self.cached_overlay else {
            return;
        };
        if let Err(e) = overlay.composite_onto(frame, self.config.overlay_alpha) {
            log::warn!(
                "Dropping overlay from frame {}: {e}",
                overlay.frame_index()
            );
            self.cached_overlay = None;
        }
    }
}

/// Frames per second over a rolling one-second window.
struct FpsMeter {
    window_start: Instant,
    frames: u32,
    fps: f64,
}

impl FpsMeter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self) -> f64 {
        self.frames += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= FPS_WINDOW {
            self.fps = self.frames as f64 / elapsed.as_secs_f64();
            self.frames = 0;
            self.window_start = Instant::now();
        }
        self.fps
    }
}
