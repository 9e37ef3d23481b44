//! Two-tier key/value cache: an in-memory map in front of a directory of
//! `<key>.cache` files.
//!
//! Disk writes go to a temp file that is then renamed over the target, so a
//! reader (or a process restarted after a crash) sees either the previous
//! record or the new one, never a torn write.
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::cache::domain::cache_entry::{now_millis, CacheEntry};
use crate::shared::constants::STALE_TEMP_AGE;

const CACHE_EXTENSION: &str = "cache";
const TEMP_EXTENSION: &str = "tmp";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid cache key {0:?}: use letters, digits, '-', '_' or '.'")]
    InvalidKey(String),
    #[error("cache I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize cache value: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct PersistentCache {
    dir: PathBuf,
    memory: Mutex<HashMap<String, CacheEntry>>,
    /// Orders disk mutations so the disk tier ends in the same state as the
    /// memory tier. Readers never take it.
    write_order: Mutex<()>,
    /// Bumped under the memory lock by every mutation. A disk read only
    /// repopulates memory if no mutation happened while it ran.
    epoch: AtomicU64,
    temp_counter: AtomicU64,
}

impl PersistentCache {
    /// Opens (and creates if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            memory: Mutex::new(HashMap::new()),
            write_order: Mutex::new(()),
            epoch: AtomicU64::new(0),
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the value for `key` if present, unexpired and of type `T`.
    ///
    /// Memory is consulted first; a miss falls through to disk and a valid
    /// disk record repopulates memory.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("Cache entry {key:?} has an unexpected shape: {e}");
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get_value(key).is_some()
    }

    fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        if validate_key(key).is_err() {
            log::debug!("Ignoring lookup of invalid cache key {key:?}");
            return None;
        }

        let epoch = {
            let mut memory = self.memory();
            match memory.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {
                    memory.remove(key);
                }
                None => {}
            }
            self.epoch.load(Ordering::SeqCst)
        };

        let path = self.entry_path(key);
        let entry = match read_entry(&path) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Unreadable cache file {}: {e}", path.display());
                return None;
            }
        };

        if entry.is_expired() {
            self.remove_if_expired(&path);
            return None;
        }

        let value = entry.value.clone();
        let mut memory = self.memory();
        if self.epoch.load(Ordering::SeqCst) == epoch {
            memory.insert(key.to_string(), entry);
        }
        Some(value)
    }

    /// Removes an expired file unless a `set` replaced it since it was read.
    fn remove_if_expired(&self, path: &Path) {
        let _order = self.write_order();
        if let Ok(Some(entry)) = read_entry(path) {
            if entry.is_expired() {
                remove_quietly(path);
            }
        }
    }

    /// Stores `value` under `key` in both tiers. `ttl` of `None` never expires.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        validate_key(key)?;
        let entry = CacheEntry::new(serde_json::to_value(value)?, ttl);
        let bytes = serde_json::to_vec(&entry)?;

        let _order = self.write_order();
        self.mutate_memory(|memory| {
            memory.insert(key.to_string(), entry);
        });
        self.write_atomic(&self.entry_path(key), &bytes)
    }

    /// Removes `key` from both tiers. Missing keys are not an error.
    pub fn delete(&self, key: &str) {
        if validate_key(key).is_err() {
            return;
        }
        let _order = self.write_order();
        // File first: a reader that misses memory afterwards finds nothing.
        remove_quietly(&self.entry_path(key));
        self.mutate_memory(|memory| {
            memory.remove(key);
        });
    }

    /// Removes every entry from both tiers.
    pub fn clear(&self) {
        let _order = self.write_order();
        for path in self.files_with_extension(CACHE_EXTENSION) {
            remove_quietly(&path);
        }
        self.mutate_memory(HashMap::clear);
    }

    /// Sweeps both tiers, dropping expired entries, corrupt files and
    /// abandoned temp files. Returns the number of files removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = now_millis();
        self.memory().retain(|_, entry| !entry.is_expired_at(now));

        let _order = self.write_order();
        let mut removed = 0;
        for path in self.files_with_extension(CACHE_EXTENSION) {
            let stale = match read_entry(&path) {
                Ok(Some(entry)) => entry.is_expired_at(now),
                Ok(None) => false,
                Err(e) => {
                    log::warn!("Removing corrupt cache file {}: {e}", path.display());
                    true
                }
            };
            if stale && remove_quietly(&path) {
                removed += 1;
            }
        }

        for path in self.files_with_extension(TEMP_EXTENSION) {
            if is_older_than(&path, STALE_TEMP_AGE) && remove_quietly(&path) {
                removed += 1;
            }
        }
        removed
    }

    fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let temp = self.temp_path(dest);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CacheError::Io { path, source }
        };

        let result = fs::File::create(&temp)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .map_err(io_err(&temp))
            .and_then(|()| fs::rename(&temp, dest).map_err(io_err(dest)));

        if result.is_err() {
            remove_quietly(&temp);
        }
        result
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{CACHE_EXTENSION}"))
    }

    fn temp_path(&self, dest: &Path) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let stem = dest
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.dir
            .join(format!("{stem}.{}-{n}.{TEMP_EXTENSION}", std::process::id()))
    }

    fn files_with_extension(&self, extension: &str) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot list cache directory {}: {e}", self.dir.display());
                return Vec::new();
            }
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == extension))
            .collect()
    }

    fn mutate_memory(&self, apply: impl FnOnce(&mut HashMap<String, CacheEntry>)) {
        let mut memory = self.memory();
        apply(&mut memory);
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_order(&self) -> MutexGuard<'_, ()> {
        self.write_order.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}

/// `Ok(None)` when the file does not exist; `Err` when it exists but cannot
/// be read or parsed.
fn read_entry(path: &Path) -> Result<Option<CacheEntry>, Box<dyn std::error::Error>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Best-effort removal. Returns true if the file was removed.
fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!("Failed to remove {}: {e}", path.display());
            false
        }
    }
}

fn is_older_than(path: &Path, age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|elapsed| elapsed > age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Groups {
        names: Vec<String>,
        generation: u32,
    }

    fn groups(generation: u32) -> Groups {
        Groups {
            names: vec!["Group_0".into(), "Group_Single_1".into()],
            generation,
        }
    }

    #[test]
    fn test_set_then_get_round_trips() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        cache.set("face_groups", &groups(1), None).unwrap();
        assert_eq!(cache.get::<Groups>("face_groups"), Some(groups(1)));
    }

    #[test]
    fn test_get_missing_key_is_absent() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        assert_eq!(cache.get::<Groups>("nothing"), None);
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        cache
            .set("short", &"lived", Some(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(cache.get::<String>("short"), Some("lived".to_string()));
        thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.get::<String>("short"), None);
        assert!(!tmp.path().join("short.cache").exists());
    }

    #[test]
    fn test_disk_tier_serves_a_fresh_instance() {
        let tmp = TempDir::new().unwrap();
        PersistentCache::open(tmp.path())
            .unwrap()
            .set("face_groups", &groups(2), None)
            .unwrap();

        let other = PersistentCache::open(tmp.path()).unwrap();
        assert_eq!(other.get::<Groups>("face_groups"), Some(groups(2)));
    }

    #[test]
    fn test_disk_file_holds_value_timestamp_ttl_record() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        cache
            .set("k", &42, Some(Duration::from_secs(10)))
            .unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(tmp.path().join("k.cache")).unwrap()).unwrap();
        assert_eq!(raw["value"], 42);
        assert_eq!(raw["ttl"], 10_000);
        assert!(raw["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_interrupted_write_leaves_previous_value_readable() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        cache.set("face_groups", &groups(1), None).unwrap();

        // A crash between temp write and rename leaves only a torn temp file.
        let torn = tmp.path().join("face_groups.999-0.tmp");
        fs::write(&torn, br#"{"value": {"names": ["Gro"#).unwrap();

        let restarted = PersistentCache::open(tmp.path()).unwrap();
        assert_eq!(restarted.get::<Groups>("face_groups"), Some(groups(1)));
    }

    #[test]
    fn test_successful_write_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        cache.set("a", &1, None).unwrap();
        cache.set("a", &2, None).unwrap();
        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a.cache".to_string()]);
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_values() {
        let tmp = TempDir::new().unwrap();
        let writer = Arc::new(PersistentCache::open(tmp.path()).unwrap());
        let big = |fill: u32| vec![fill; 20_000];
        writer.set("blob", &big(0), None).unwrap();

        let dir = tmp.path().to_path_buf();
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let dir = dir.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        // Fresh instance each time so every read hits disk.
                        let cache = PersistentCache::open(&dir).unwrap();
                        let value: Vec<u32> = cache.get("blob").expect("value must stay readable");
                        assert_eq!(value.len(), 20_000);
                        assert!(value.iter().all(|&v| v == value[0]));
                    }
                })
            })
            .collect();

        for fill in 1..30 {
            writer.set("blob", &big(fill), None).unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn test_sub_millisecond_ttl_still_expires() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        cache
            .set("k", &1u32, Some(Duration::from_micros(500)))
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.get::<u32>("k"), None);
    }

    #[test]
    fn test_disk_read_racing_delete_never_resurrects_entry() {
        let tmp = TempDir::new().unwrap();
        for _ in 0..200 {
            PersistentCache::open(tmp.path())
                .unwrap()
                .set("k", &"old", None)
                .unwrap();
            // Fresh instance: memory is cold, so `get` goes to disk.
            let cache = Arc::new(PersistentCache::open(tmp.path()).unwrap());
            let reader = {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get::<String>("k"))
            };
            cache.delete("k");
            let seen = reader.join().unwrap();
            assert!(seen.is_none() || seen.as_deref() == Some("old"));
            assert_eq!(cache.get::<String>("k"), None);
        }
    }

    #[test]
    fn test_disk_read_racing_set_keeps_newest_value() {
        let tmp = TempDir::new().unwrap();
        for round in 0..200u32 {
            PersistentCache::open(tmp.path())
                .unwrap()
                .set("k", &round, None)
                .unwrap();
            let cache = Arc::new(PersistentCache::open(tmp.path()).unwrap());
            let reader = {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get::<u32>("k"))
            };
            cache.set("k", &(round + 1_000), None).unwrap();
            reader.join().unwrap();
            assert_eq!(cache.get::<u32>("k"), Some(round + 1_000));
        }
    }

    #[test]
    fn test_delete_removes_both_tiers() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        cache.set("k", &"v", None).unwrap();
        cache.delete("k");
        cache.delete("k");
        assert_eq!(cache.get::<String>("k"), None);
        assert!(!tmp.path().join("k.cache").exists());
    }

    #[test]
    fn test_clear_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        cache.set("a", &1, None).unwrap();
        cache.set("b", &2, None).unwrap();
        cache.clear();
        assert!(!cache.contains("a"));
        assert!(!cache.contains("b"));
        let reopened = PersistentCache::open(tmp.path()).unwrap();
        assert!(!reopened.contains("a"));
    }

    #[test]
    fn test_corrupt_file_reads_absent_and_is_swept() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        let path = tmp.path().join("broken.cache");
        fs::write(&path, b"not json").unwrap();

        assert_eq!(cache.get::<u32>("broken"), None);
        assert_eq!(cache.cleanup_expired(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_cleanup_removes_expired_but_keeps_live_entries() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        cache
            .set("old", &1, Some(Duration::from_millis(20)))
            .unwrap();
        cache.set("live", &2, None).unwrap();
        thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.cleanup_expired(), 1);
        assert!(!tmp.path().join("old.cache").exists());
        assert_eq!(cache.get::<u32>("live"), Some(2));
    }

    #[test]
    fn test_cleanup_removes_only_stale_temp_files() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        let fresh = tmp.path().join("k.1-0.tmp");
        let stale = tmp.path().join("k.1-1.tmp");
        fs::write(&fresh, b"partial").unwrap();
        fs::write(&stale, b"partial").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(old)
            .unwrap();

        assert_eq!(cache.cleanup_expired(), 1);
        assert!(fresh.exists());
        assert!(!stale.exists());
    }

    #[test]
    fn test_invalid_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        for key in ["", "../escape", "a/b", ".hidden", "sp ace"] {
            assert!(
                matches!(cache.set(key, &1, None), Err(CacheError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
            assert_eq!(cache.get::<u32>(key), None);
        }
    }

    #[test]
    fn test_type_mismatch_reads_absent_without_deleting() {
        let tmp = TempDir::new().unwrap();
        let cache = PersistentCache::open(tmp.path()).unwrap();
        cache.set("k", &"text", None).unwrap();
        assert_eq!(cache.get::<u32>("k"), None);
        assert_eq!(cache.get::<String>("k"), Some("text".to_string()));
    }
}
