use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use facewatch_core::clustering::domain::cluster_group::DistanceMetric;
use facewatch_core::pipeline::live_session::SessionConfig;
use facewatch_core::shared::constants::{
    CLUSTERING_EPS, CLUSTERING_MIN_SAMPLES, GROUP_MATCH_THRESHOLD, PROFILE_DEBOUNCE,
    RECOGNITION_TOLERANCE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherKind {
    Cosine,
    Euclidean,
}

impl std::fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatcherKind::Cosine => write!(f, "cosine"),
            MatcherKind::Euclidean => write!(f, "euclidean"),
        }
    }
}

/// Persisted CLI defaults. Command-line flags override these per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub profile_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub confidence: f64,
    pub matcher: MatcherKind,
    pub tolerance: f64,
    pub cluster_eps: f64,
    pub cluster_min_samples: usize,
    pub cluster_metric: DistanceMetric,
    pub group_threshold: f64,
    pub debounce_ms: u64,
    pub show_fps: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile_dir: None,
            cache_dir: None,
            confidence: 0.5,
            matcher: MatcherKind::Cosine,
            tolerance: RECOGNITION_TOLERANCE,
            cluster_eps: CLUSTERING_EPS,
            cluster_min_samples: CLUSTERING_MIN_SAMPLES,
            cluster_metric: DistanceMetric::Euclidean,
            group_threshold: GROUP_MATCH_THRESHOLD,
            debounce_ms: PROFILE_DEBOUNCE.as_millis() as u64,
            show_fps: true,
        }
    }
}

impl Settings {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("FaceWatch").join("settings.json"))
    }

    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Missing or unreadable files give the defaults.
    pub fn load_from(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|json| match serde_json::from_str(&json) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    log::warn!("Ignoring malformed settings {}: {e}", path.display());
                    None
                }
            })
            .unwrap_or_default()
    }

    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            self.save_to(&path);
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    log::warn!("Failed to save settings to {}: {e}", path.display());
                }
            }
            Err(e) => log::warn!("Failed to serialize settings: {e}"),
        }
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.profile_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("FaceWatch").join("profiles"))
                .unwrap_or_else(|| PathBuf::from("profiles"))
        })
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|d| d.join("FaceWatch").join("cache"))
                .unwrap_or_else(|| PathBuf::from(".facewatch-cache"))
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.profile_dir(), self.cache_dir());
        config.watcher.debounce = Duration::from_millis(self.debounce_ms);
        config.recognition.tolerance = self.tolerance;
        config.clustering.eps = self.cluster_eps;
        config.clustering.min_samples = self.cluster_min_samples;
        config.clustering.metric = self.cluster_metric;
        config.clustering.match_threshold = self.group_threshold;
        config.capture.show_fps = self.show_fps;
        config
    }
}
