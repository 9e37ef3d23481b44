use std::time::Duration;

pub const YOLO_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const YOLO_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

pub const EMBEDDING_MODEL_NAME: &str = "w600k_r50.onnx";
pub const EMBEDDING_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/w600k_r50.onnx";

/// Extensions (lowercase, no dot) accepted as profile images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

pub const FRAME_BUFFER_DEPTH: usize = 10;
pub const OVERLAY_BUFFER_DEPTH: usize = 5;
pub const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Weight of the overlay layer when composited onto a frame.
pub const OVERLAY_ALPHA: f32 = 0.5;
/// A cached overlay older than this is no longer composited.
pub const OVERLAY_MAX_AGE: Duration = Duration::from_secs(1);

/// Match tolerance. With the cosine matcher a face matches when its
/// similarity is at least `1 - tolerance`.
pub const RECOGNITION_TOLERANCE: f64 = 0.6;

pub const CLUSTERING_EPS: f64 = 1.0;
pub const CLUSTERING_MIN_SAMPLES: usize = 2;
/// Maximum distance from a group member for `get_group_name` to answer.
pub const GROUP_MATCH_THRESHOLD: f64 = 1.0;
pub const CLUSTER_REFRESH_PERIOD: Duration = Duration::from_secs(60);
pub const CLUSTER_CACHE_KEY: &str = "face_groups";

pub const UNKNOWN_LABEL: &str = "Unknown";

pub const PROFILE_DEBOUNCE: Duration = Duration::from_millis(500);
/// Minimum quality score (0-100) for a profile image to survive cleanup.
pub const IMAGE_QUALITY_THRESHOLD: f64 = 50.0;

/// Temp files older than this are considered abandoned by the cache sweep.
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(60);

/// Overlay colors, RGB.
pub const KNOWN_FACE_COLOR: [u8; 3] = [0, 255, 0];
pub const GROUPED_FACE_COLOR: [u8; 3] = [255, 191, 0];
pub const UNKNOWN_FACE_COLOR: [u8; 3] = [0, 0, 255];
pub const TEXT_COLOR: [u8; 3] = [255, 255, 255];

/// Returns true if the path has one of the accepted image extensions.
pub fn is_image_path(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
