mod settings;

use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;

use facewatch_core::clustering::domain::cluster_group::DistanceMetric;
use facewatch_core::pipeline::live_session::{
    LiveSession, SessionDevices, SessionLoggers,
};
use facewatch_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use facewatch_core::profiles::infrastructure::analyzer_profile_encoder::AnalyzerProfileEncoder;
use facewatch_core::profiles::infrastructure::image_quality_inspector::ImageQualityInspector;
use facewatch_core::profiles::infrastructure::notify_watcher::NotifyDirectoryWatcher;
use facewatch_core::profiles::infrastructure::profile_cleaner::ProfileCleaner;
use facewatch_core::recognition::domain::face_analyzer::SharedFaceAnalyzer;
use facewatch_core::recognition::domain::face_matcher::FaceMatcher;
use facewatch_core::recognition::infrastructure::cosine_matcher::CosineMatcher;
use facewatch_core::recognition::infrastructure::euclidean_matcher::EuclideanMatcher;
use facewatch_core::recognition::infrastructure::onnx_face_analyzer::OnnxFaceAnalyzer;
use facewatch_core::shared::constants::{
    EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL, YOLO_MODEL_NAME, YOLO_MODEL_URL,
};
use facewatch_core::shared::model_resolver::ModelResolver;
use facewatch_core::video::domain::camera_source::CameraSource;
use facewatch_core::video::infrastructure::ffmpeg_camera::FfmpegCamera;
use facewatch_core::video::infrastructure::image_file_reader::ImageFileReader;
use facewatch_core::video::infrastructure::snapshot_display::SnapshotDisplay;

use settings::{MatcherKind, Settings};

/// Live face recognition against a watched directory of profile images.
///
/// Type `q` and Enter to quit.
#[derive(Parser)]
#[command(name = "facewatch")]
struct Cli {
    /// Directory of profile images, one face per file, named after the person.
    #[arg(long)]
    profiles: Option<PathBuf>,

    /// Directory for the persistent cache (face groups).
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Capture device, e.g. /dev/video0 (default: the platform's first camera).
    #[arg(long)]
    device: Option<String>,

    /// Capture input format, e.g. v4l2, avfoundation, dshow.
    #[arg(long)]
    format: Option<String>,

    /// Read frames from a video file instead of a camera.
    #[arg(long, conflicts_with = "device")]
    input: Option<PathBuf>,

    /// Restart the input video when it ends.
    #[arg(long = "loop", requires = "input")]
    looping: bool,

    /// Image file the composited view is written to.
    #[arg(long, default_value = "facewatch.png")]
    snapshot: PathBuf,

    /// Write every Nth displayed frame.
    #[arg(long, default_value = "15")]
    snapshot_every: u64,

    /// End the session after this many displayed frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long)]
    confidence: Option<f64>,

    /// Matcher: cosine or euclidean.
    #[arg(long)]
    matcher: Option<String>,

    /// Match tolerance for the matcher.
    #[arg(long)]
    tolerance: Option<f64>,

    /// Clustering neighborhood radius.
    #[arg(long)]
    cluster_eps: Option<f64>,

    /// Clustering distance: euclidean or cosine.
    #[arg(long)]
    cluster_metric: Option<String>,

    /// Seconds between status lines.
    #[arg(long, default_value = "5")]
    status_interval: u64,

    /// Hide the FPS readout.
    #[arg(long)]
    no_fps: bool,

    /// Store the effective settings as the new defaults.
    #[arg(long)]
    save_settings: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut settings = Settings::load();
    apply_overrides(&cli, &mut settings)?;
    validate(&cli, &settings)?;
    if cli.save_settings {
        settings.save();
    }

    let resolver = ModelResolver::platform()?;
    log::info!("Resolving models: {YOLO_MODEL_NAME}, {EMBEDDING_MODEL_NAME}");
    let detector_path = resolver.resolve(
        YOLO_MODEL_NAME,
        YOLO_MODEL_URL,
        Some(Box::new(download_progress)),
    )?;
    let embedder_path = resolver.resolve(
        EMBEDDING_MODEL_NAME,
        EMBEDDING_MODEL_URL,
        Some(Box::new(download_progress)),
    )?;
    eprintln!();

    let recognition_analyzer =
        OnnxFaceAnalyzer::new(&detector_path, &embedder_path, settings.confidence)?;
    let profile_analyzer: SharedFaceAnalyzer = Arc::new(Mutex::new(OnnxFaceAnalyzer::new(
        &detector_path,
        &embedder_path,
        settings.confidence,
    )?));

    let mut display = SnapshotDisplay::new(&cli.snapshot, cli.snapshot_every);
    if let Some(max) = cli.max_frames {
        display = display.with_max_frames(max);
    }
    spawn_quit_listener(display.quit_handle());
    log::info!("Writing view to {}", cli.snapshot.display());

    let matcher: Arc<dyn FaceMatcher> = match settings.matcher {
        MatcherKind::Cosine => Arc::new(CosineMatcher::new(settings.tolerance)),
        MatcherKind::Euclidean => Arc::new(EuclideanMatcher::new(settings.tolerance)),
    };

    let devices = SessionDevices {
        camera: open_camera(&cli),
        display: Box::new(display),
        analyzer: Box::new(recognition_analyzer),
        matcher,
        cleanup: Box::new(ProfileCleaner::new(
            Box::new(ImageFileReader::new()),
            Box::new(ImageQualityInspector::new()),
            Arc::clone(&profile_analyzer),
        )),
        encoder: Box::new(AnalyzerProfileEncoder::new(
            Box::new(ImageFileReader::new()),
            profile_analyzer,
        )),
        directory_watcher: Box::new(NotifyDirectoryWatcher::new()),
    };
    let interval = Duration::from_secs(cli.status_interval.max(1));
    let loggers = SessionLoggers {
        display: Some(Box::new(StdoutPipelineLogger::new("display", interval))),
        recognition: Some(Box::new(StdoutPipelineLogger::new("recognition", interval))),
    };

    let config = settings.session_config();
    log::info!("Profiles: {}", config.watcher.profile_dir.display());
    let mut session = LiveSession::new(config, devices, loggers)?;
    session.run()?;
    Ok(())
}

fn apply_overrides(cli: &Cli, settings: &mut Settings) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(dir) = &cli.profiles {
        settings.profile_dir = Some(dir.clone());
    }
    if let Some(dir) = &cli.cache_dir {
        settings.cache_dir = Some(dir.clone());
    }
    if let Some(confidence) = cli.confidence {
        settings.confidence = confidence;
    }
    if let Some(matcher) = &cli.matcher {
        settings.matcher = match matcher.as_str() {
            "cosine" => MatcherKind::Cosine,
            "euclidean" => MatcherKind::Euclidean,
            other => {
                return Err(
                    format!("Matcher must be 'cosine' or 'euclidean', got '{other}'").into(),
                )
            }
        };
    }
    if let Some(tolerance) = cli.tolerance {
        settings.tolerance = tolerance;
    }
    if let Some(eps) = cli.cluster_eps {
        settings.cluster_eps = eps;
    }
    if let Some(metric) = &cli.cluster_metric {
        settings.cluster_metric = match metric.as_str() {
            "euclidean" => DistanceMetric::Euclidean,
            "cosine" => DistanceMetric::Cosine,
            other => {
                return Err(format!(
                    "Cluster metric must be 'euclidean' or 'cosine', got '{other}'"
                )
                .into())
            }
        };
    }
    if cli.no_fps {
        settings.show_fps = false;
    }
    Ok(())
}

fn validate(cli: &Cli, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(input) = &cli.input {
        if !input.exists() {
            return Err(format!("Input file not found: {}", input.display()).into());
        }
    }
    if !(0.0..=1.0).contains(&settings.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            settings.confidence
        )
        .into());
    }
    if settings.tolerance <= 0.0 {
        return Err(format!("Tolerance must be positive, got {}", settings.tolerance).into());
    }
    if settings.cluster_eps <= 0.0 {
        return Err(format!(
            "Cluster radius must be positive, got {}",
            settings.cluster_eps
        )
        .into());
    }
    if cli.snapshot_every == 0 {
        return Err("Snapshot interval must be at least 1".into());
    }
    Ok(())
}

fn open_camera(cli: &Cli) -> Box<dyn CameraSource> {
    if let Some(input) = &cli.input {
        return Box::new(FfmpegCamera::file(input, cli.looping));
    }
    match (&cli.format, &cli.device) {
        (Some(format), Some(device)) => Box::new(FfmpegCamera::device(format, device)),
        (None, Some(device)) => Box::new(FfmpegCamera::device(default_format(), device)),
        (Some(format), None) => Box::new(FfmpegCamera::device(format, default_device_name())),
        (None, None) => Box::new(FfmpegCamera::default_device()),
    }
}

fn default_format() -> &'static str {
    if cfg!(target_os = "macos") {
        "avfoundation"
    } else if cfg!(target_os = "windows") {
        "dshow"
    } else {
        "v4l2"
    }
}

fn default_device_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "0"
    } else if cfg!(target_os = "windows") {
        "video=Integrated Camera"
    } else {
        "/dev/video0"
    }
}

/// Sets `quit` when `q` is entered on stdin.
fn spawn_quit_listener(quit: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("stdin-quit".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(text) if text.trim().eq_ignore_ascii_case("q") => {
                        quit.store(true, Ordering::SeqCst);
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("Keyboard quit unavailable: {e}");
    }
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading model... {pct}%");
    } else {
        eprint!("\rDownloading model... {downloaded} bytes");
    }
}
