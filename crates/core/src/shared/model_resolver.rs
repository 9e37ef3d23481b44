use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create model directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Locates ONNX model files, downloading them into a cache directory the
/// first time they are needed.
pub struct ModelResolver {
    cache_dir: PathBuf,
    bundled_dir: Option<PathBuf>,
}

impl ModelResolver {
    /// Resolver rooted at the platform cache directory.
    pub fn platform() -> Result<Self, ModelResolveError> {
        Ok(Self::new(default_model_dir()?, None))
    }

    pub fn new(cache_dir: PathBuf, bundled_dir: Option<PathBuf>) -> Self {
        Self {
            cache_dir,
            bundled_dir,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Lookup order: cache directory, bundled directory, then download.
    pub fn resolve(
        &self,
        name: &str,
        url: &str,
        progress: Option<ProgressFn>,
    ) -> Result<PathBuf, ModelResolveError> {
        let cached_path = self.cache_dir.join(name);
        if cached_path.exists() {
            return Ok(cached_path);
        }

        if let Some(dir) = &self.bundled_dir {
            let bundled_path = dir.join(name);
            if bundled_path.exists() {
                return Ok(bundled_path);
            }
        }

        fs::create_dir_all(&self.cache_dir).map_err(ModelResolveError::CacheDir)?;
        log::info!("Downloading model {name} from {url}");
        download(url, &cached_path, progress)?;
        Ok(cached_path)
    }
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/FaceWatch/models/`
/// - Linux: `$XDG_CACHE_HOME/FaceWatch/models/` or `~/.cache/FaceWatch/models/`
/// - Windows: `%LOCALAPPDATA%/FaceWatch/models/`
pub fn default_model_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    let base = dirs::data_dir();
    #[cfg(not(target_os = "macos"))]
    let base = dirs::cache_dir();

    base.map(|d| d.join("FaceWatch").join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ModelResolveError::Write { path, source }
    };

    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;
    let total = response.content_length().unwrap_or(0);
    let bytes = response.bytes().map_err(|e| ModelResolveError::Download {
        url: url.to_string(),
        source: e,
    })?;

    // Partial downloads never land at `dest`.
    let temp_path = dest.with_extension("part");
    let mut file = fs::File::create(&temp_path).map_err(write_err(&temp_path))?;

    let mut downloaded: u64 = 0;
    for chunk in bytes.chunks(1024 * 1024) {
        if let Err(e) = file.write_all(chunk) {
            drop(file);
            let _ = fs::remove_file(&temp_path);
            return Err(write_err(&temp_path)(e));
        }
        downloaded += chunk.len() as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }

    file.sync_all().map_err(write_err(&temp_path))?;
    drop(file);

    fs::rename(&temp_path, dest).map_err(write_err(dest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_prefers_cached_file() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("m.onnx"), b"cached").unwrap();

        let resolver = ModelResolver::new(cache.clone(), None);
        let path = resolver
            .resolve("m.onnx", "http://invalid.example.invalid/m.onnx", None)
            .unwrap();
        assert_eq!(path, cache.join("m.onnx"));
    }

    #[test]
    fn test_resolve_falls_back_to_bundled_file() {
        let tmp = TempDir::new().unwrap();
        let bundled = tmp.path().join("bundled");
        fs::create_dir_all(&bundled).unwrap();
        fs::write(bundled.join("m.onnx"), b"bundled").unwrap();

        let resolver = ModelResolver::new(tmp.path().join("cache"), Some(bundled.clone()));
        let path = resolver
            .resolve("m.onnx", "http://invalid.example.invalid/m.onnx", None)
            .unwrap();
        assert_eq!(path, bundled.join("m.onnx"));
    }

    #[test]
    fn test_failed_download_leaves_no_partial_file() {
        let tmp = TempDir::new().unwrap();
        let resolver = ModelResolver::new(tmp.path().to_path_buf(), None);
        let result = resolver.resolve("m.onnx", "http://invalid.nonexistent.invalid/m", None);
        assert!(result.is_err());
        assert!(!tmp.path().join("m.onnx").exists());
        assert!(!tmp.path().join("m.part").exists());
    }

    #[test]
    fn test_default_model_dir_names_the_app() {
        if let Ok(dir) = default_model_dir() {
            assert!(dir.to_string_lossy().contains("FaceWatch"));
            assert!(dir.ends_with("models"));
        }
    }
}
