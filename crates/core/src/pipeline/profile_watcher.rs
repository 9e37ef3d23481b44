use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::pipeline::clustering_stage::ClusteringStage;
use crate::pipeline::pipeline_error::{join_logged, spawn_named, PipelineError};
use crate::pipeline::recognition_stage::RecognitionStage;
use crate::profiles::domain::directory_watcher::{DirectoryWatcher, ProfileEvent};
use crate::profiles::domain::profile_cleanup::ProfileCleanup;
use crate::profiles::domain::profile_encoder::ProfileEncoder;
use crate::profiles::domain::profile_images::list_images;
use crate::shared::constants::{is_image_path, POP_TIMEOUT, PROFILE_DEBOUNCE};
use crate::shared::stop_signal::StopSignal;

#[derive(Clone, Debug)]
pub struct WatcherConfig {
    pub profile_dir: PathBuf,
    /// Quiet period after a trigger before a run starts.
    pub debounce: Duration,
    /// Queue one run at start so known faces load without a change.
    pub initial_scan: bool,
}

impl WatcherConfig {
    pub fn new(profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile_dir: profile_dir.into(),
            debounce: PROFILE_DEBOUNCE,
            initial_scan: true,
        }
    }
}

/// Outcome of one successful profile run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub removed: usize,
    pub images: usize,
    pub encoded: usize,
}

/// Keeps the known faces and clusters in step with a profile directory.
///
/// Qualifying file events are coalesced into a single-slot trigger. A
/// worker waits out the debounce window, then cleans the directory,
/// re-encodes every image and replaces the known faces and clusters in one
/// step. Triggers arriving while a run is in flight are coalesced into it
/// and start no further run; this includes the cleaner's own deletions.
pub struct ProfileWatcher {
    config: WatcherConfig,
    watcher: Box<dyn DirectoryWatcher>,
    job: Option<ProfileJob>,
    stop: StopSignal,
    handles: Vec<(&'static str, JoinHandle<()>)>,
    runs: Arc<AtomicUsize>,
}

impl ProfileWatcher {
    pub fn new(
        config: WatcherConfig,
        watcher: Box<dyn DirectoryWatcher>,
        cleanup: Box<dyn ProfileCleanup>,
        encoder: Box<dyn ProfileEncoder>,
        recognition: RecognitionStage,
        clustering: ClusteringStage,
        global: &StopSignal,
    ) -> Self {
        let runs = Arc::new(AtomicUsize::new(0));
        Self {
            job: Some(ProfileJob {
                dir: config.profile_dir.clone(),
                cleanup,
                encoder,
                recognition,
                clustering,
                runs: Arc::clone(&runs),
            }),
            config,
            watcher,
            stop: global.child(),
            handles: Vec::new(),
            runs,
        }
    }

    /// Number of runs started so far.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Subscribes to the profile directory and spawns the dispatch and
    /// worker threads. Does nothing if already running.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.is_running() {
            return Ok(());
        }
        if self.job.is_none() {
            return Err(PipelineError::Stopped { stage: "profile watcher" });
        }

        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        self.watcher.watch(&self.config.profile_dir, event_tx)?;

        let (trigger_tx, trigger_rx) = crossbeam_channel::bounded::<()>(1);
        if self.config.initial_scan {
            let _ = trigger_tx.try_send(());
        }

        let Some(job) = self.job.take() else {
            return Err(PipelineError::Stopped { stage: "profile watcher" });
        };
        let worker = {
            let stop = self.stop.clone();
            let debounce = self.config.debounce;
            spawn_named("profile-worker", move || {
                run_worker(job, &trigger_rx, &stop, debounce)
            })
        };
        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                self.watcher.unwatch();
                return Err(e);
            }
        };

        let stop = self.stop.clone();
        let dispatch = match spawn_named("profile-events", move || {
            run_dispatch(&event_rx, &trigger_tx, &stop)
        }) {
            Ok(handle) => handle,
            Err(e) => {
                self.stop.set();
                self.watcher.unwatch();
                join_logged("profile-worker", worker);
                return Err(e);
            }
        };

        log::info!("Watching profiles in {}", self.config.profile_dir.display());
        self.handles.push(("profile-events", dispatch));
        self.handles.push(("profile-worker", worker));
        Ok(())
    }

    /// Unsubscribes and waits for the threads. A run in progress finishes
    /// first. Idempotent.
    pub fn stop(&mut self) {
        self.stop.set();
        self.watcher.unwatch();
        for (name, handle) in self.handles.drain(..) {
            join_logged(name, handle);
        }
    }
}

impl Drop for ProfileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Whether an event should trigger a run.
fn qualifies(event: &ProfileEvent) -> bool {
    !event.is_dir && is_image_path(&event.path)
}

fn run_dispatch(events: &Receiver<ProfileEvent>, triggers: &Sender<()>, stop: &StopSignal) {
    while !stop.is_set() {
        match events.recv_timeout(POP_TIMEOUT) {
            Ok(event) => {
                if !qualifies(&event) {
                    continue;
                }
                log::debug!("Profile change: {:?} {}", event.kind, event.path.display());
                match triggers.try_send(()) {
                    Ok(()) | Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Disconnected(())) => break,
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_worker(mut job: ProfileJob, triggers: &Receiver<()>, stop: &StopSignal, debounce: Duration) {
    while !stop.is_set() {
        match triggers.recv_timeout(POP_TIMEOUT) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if stop.wait_timeout(debounce) {
            break;
        }
        // Anything that arrived during the window is covered by this run.
        while triggers.try_recv().is_ok() {}

        match job.run() {
            Ok(summary) => log::info!(
                "Profile run: {} removed, {} of {} images encoded",
                summary.removed,
                summary.encoded,
                summary.images
            ),
            Err(e) => log::warn!("Profile run failed, known faces unchanged: {e}"),
        }
        // Changes seen while the run was in flight are coalesced into it.
        while triggers.try_recv().is_ok() {}
    }
}

struct ProfileJob {
    dir: PathBuf,
    cleanup: Box<dyn ProfileCleanup>,
    encoder: Box<dyn ProfileEncoder>,
    recognition: RecognitionStage,
    clustering: ClusteringStage,
    runs: Arc<AtomicUsize>,
}

impl ProfileJob {
    /// Cleans, encodes and applies. Nothing is applied unless every step
    /// before the replacement succeeds.
    fn run(&mut self) -> Result<RunSummary, Box<dyn std::error::Error>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let removed = self.cleanup.cleanup(&self.dir)?;
        let images = list_images(&self.dir)?;

        let mut encodings = Vec::with_capacity(images.len());
        let mut names = Vec::with_capacity(images.len());
        for path in &images {
            match self.encoder.encode_file(path) {
                Ok(Some(encoding)) => {
                    names.push(encoding.name().to_string());
                    encodings.push(encoding.vector().to_vec());
                }
                Ok(None) => log::debug!("No face in {}", path.display()),
                Err(e) => log::warn!("Skipping {}: {e}", path.display()),
            }
        }

        let summary = RunSummary {
            removed: removed.len(),
            images: images.len(),
            encoded: encodings.len(),
        };
        if encodings.is_empty() {
            return Ok(summary);
        }

        self.recognition
            .update_known_faces(encodings.clone(), names)?;
        self.clustering.update_clusters(&encodings);
        log::debug!(
            "Profile run took {:.0}ms",
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::infrastructure::persistent_cache::PersistentCache;
    use crate::pipeline::clustering_stage::ClusteringConfig;
    use crate::pipeline::recognition_stage::RecognitionConfig;
    use crate::profiles::domain::directory_watcher::ProfileEventKind;
    use crate::recognition::infrastructure::euclidean_matcher::EuclideanMatcher;
    use crate::shared::bounded_queue::BoundedLatestQueue;
    use crate::testing::{CountingCleanup, EventInjector, InjectedWatcher, StemEncoder, StubAnalyzer};
    use std::path::Path;
    use std::thread;

    struct Harness {
        _dir: tempfile::TempDir,
        profiles: PathBuf,
        watcher: ProfileWatcher,
        injector: EventInjector,
        cleanup_runs: Arc<AtomicUsize>,
        recognition: RecognitionStage,
        clustering: ClusteringStage,
    }

    fn harness(initial_scan: bool, run_delay: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let profiles = dir.path().join("profiles");
        std::fs::create_dir(&profiles).unwrap();
        let cache = Arc::new(PersistentCache::open(dir.path().join("cache")).unwrap());

        let global = StopSignal::new();
        let clustering = ClusteringStage::new(ClusteringConfig::default(), cache, &global);
        let recognition = RecognitionStage::new(
            Box::new(StubAnalyzer::no_faces()),
            Arc::new(EuclideanMatcher::new(0.5)),
            Arc::new(BoundedLatestQueue::drop_oldest(2)),
            Arc::new(BoundedLatestQueue::drop_oldest(2)),
            Some(clustering.clone()),
            RecognitionConfig::default(),
            &global,
        );

        let injected = InjectedWatcher::new();
        let injector = injected.injector();
        let cleanup = CountingCleanup::new(run_delay);
        let cleanup_runs = cleanup.runs();
        let config = WatcherConfig {
            debounce: Duration::from_millis(100),
            initial_scan,
            ..WatcherConfig::new(&profiles)
        };
        let watcher = ProfileWatcher::new(
            config,
            Box::new(injected),
            Box::new(cleanup),
            Box::new(StemEncoder),
            recognition.clone(),
            clustering.clone(),
            &global,
        );
        Harness {
            _dir: dir,
            profiles,
            watcher,
            injector,
            cleanup_runs,
            recognition,
            clustering,
        }
    }

    fn created(path: &Path) -> ProfileEvent {
        ProfileEvent {
            kind: ProfileEventKind::Created,
            path: path.to_path_buf(),
            is_dir: false,
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn test_initial_scan_loads_known_faces_and_clusters() {
        let mut h = harness(true, Duration::ZERO);
        std::fs::write(h.profiles.join("alice.jpg"), b"aaaa").unwrap();
        std::fs::write(h.profiles.join("bob.png"), b"bbbbbbbbbbbb").unwrap();
        std::fs::write(h.profiles.join("noface.png"), b"n").unwrap();
        std::fs::write(h.profiles.join("broken.png"), b"x").unwrap();
        std::fs::write(h.profiles.join("notes.txt"), b"ignored").unwrap();

        h.watcher.start().unwrap();
        assert!(wait_for(|| h.recognition.known_faces().len() == 2));
        h.watcher.stop();

        let known = h.recognition.known_faces();
        let mut names: Vec<_> = known.names().collect();
        names.sort();
        assert_eq!(names, vec!["alice", "bob"]);
        let grouped: usize = h.clustering.groups().iter().map(|g| g.len()).sum();
        assert_eq!(grouped, 2);
        assert_eq!(h.watcher.runs(), 1);
    }

    #[test]
    fn test_no_initial_scan_waits_for_an_event() {
        let mut h = harness(false, Duration::ZERO);
        std::fs::write(h.profiles.join("alice.jpg"), b"aaaa").unwrap();
        h.watcher.start().unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(h.cleanup_runs.load(Ordering::SeqCst), 0);

        h.injector.send(created(&h.profiles.join("alice.jpg")));
        assert!(wait_for(|| h.recognition.known_faces().len() == 1));
        h.watcher.stop();
    }

    #[test]
    fn test_burst_within_debounce_window_runs_once() {
        let mut h = harness(false, Duration::ZERO);
        h.watcher.start().unwrap();
        for i in 0..5 {
            h.injector.send(created(&h.profiles.join(format!("p{i}.jpg"))));
        }
        assert!(wait_for(|| h.cleanup_runs.load(Ordering::SeqCst) >= 1));
        thread::sleep(Duration::from_millis(400));
        h.watcher.stop();
        assert_eq!(h.cleanup_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_events_during_a_run_start_no_further_run() {
        let mut h = harness(false, Duration::from_millis(400));
        h.watcher.start().unwrap();

        h.injector.send(created(&h.profiles.join("a.jpg")));
        assert!(wait_for(|| h.cleanup_runs.load(Ordering::SeqCst) == 1));
        // The first run is now stalled in cleanup.
        h.injector.send(created(&h.profiles.join("b.jpg")));
        h.injector.send(created(&h.profiles.join("c.jpg")));

        thread::sleep(Duration::from_millis(1500));
        h.watcher.stop();
        assert_eq!(h.cleanup_runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.watcher.runs(), 1);
    }

    #[test]
    fn test_event_after_a_run_starts_a_new_run() {
        let mut h = harness(false, Duration::ZERO);
        h.watcher.start().unwrap();

        h.injector.send(created(&h.profiles.join("a.jpg")));
        assert!(wait_for(|| h.watcher.runs() == 1));
        thread::sleep(Duration::from_millis(200));
        h.injector.send(created(&h.profiles.join("b.jpg")));
        assert!(wait_for(|| h.watcher.runs() == 2));
        h.watcher.stop();
    }

    #[test]
    fn test_directories_and_non_images_are_ignored() {
        let mut h = harness(false, Duration::ZERO);
        h.watcher.start().unwrap();
        h.injector.send(created(&h.profiles.join("notes.txt")));
        h.injector.send(ProfileEvent {
            kind: ProfileEventKind::Created,
            path: h.profiles.join("album.png"),
            is_dir: true,
        });
        thread::sleep(Duration::from_millis(400));
        h.watcher.stop();
        assert_eq!(h.cleanup_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_directory_leaves_known_faces_untouched() {
        let mut h = harness(true, Duration::ZERO);
        h.recognition
            .update_known_faces(vec![vec![1.0, 1.0]], vec!["carol".into()])
            .unwrap();
        h.watcher.start().unwrap();
        assert!(wait_for(|| h.cleanup_runs.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(100));
        h.watcher.stop();
        assert_eq!(h.recognition.known_faces().names().collect::<Vec<_>>(), vec!["carol"]);
    }

    #[test]
    fn test_missing_directory_fails_to_start() {
        let mut h = harness(true, Duration::ZERO);
        std::fs::remove_dir(&h.profiles).unwrap();
        assert!(matches!(h.watcher.start(), Err(PipelineError::Watch(_))));
        assert!(!h.watcher.is_running());
    }

    #[test]
    fn test_stop_is_prompt_and_idempotent() {
        let mut h = harness(false, Duration::ZERO);
        h.watcher.start().unwrap();
        h.watcher.start().unwrap();
        let begin = Instant::now();
        h.watcher.stop();
        h.watcher.stop();
        assert!(begin.elapsed() < Duration::from_secs(2));
        assert!(matches!(h.watcher.start(), Err(PipelineError::Stopped { .. })));
    }

    #[rstest::rstest]
    #[case("alice.JPG", false, true)]
    #[case("alice.jpg", true, false)]
    #[case("alice.txt", false, false)]
    #[case(".hidden", false, false)]
    fn test_qualifies(#[case] name: &str, #[case] is_dir: bool, #[case] expected: bool) {
        let event = ProfileEvent {
            kind: ProfileEventKind::Modified,
            path: PathBuf::from("/profiles").join(name),
            is_dir,
        };
        assert_eq!(qualifies(&event), expected);
    }
}
