use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cache::infrastructure::persistent_cache::PersistentCache;
use crate::clustering::domain::cluster_group::{build_groups, ClusterGroup, DistanceMetric};
use crate::clustering::infrastructure::dbscan::{dbscan, DbscanParams};
use crate::pipeline::pipeline_error::{join_logged, spawn_named, PipelineError};
use crate::shared::constants::{
    CLUSTERING_EPS, CLUSTERING_MIN_SAMPLES, CLUSTER_CACHE_KEY, CLUSTER_REFRESH_PERIOD,
    GROUP_MATCH_THRESHOLD, UNKNOWN_LABEL,
};
use crate::shared::stop_signal::StopSignal;

#[derive(Clone, Debug)]
pub struct ClusteringConfig {
    /// Neighborhood radius.
    pub eps: f64,
    /// Minimum group size, the point itself included.
    pub min_samples: usize,
    pub metric: DistanceMetric,
    /// Lookups farther than this from every member answer "Unknown".
    pub match_threshold: f64,
    pub refresh_period: Duration,
    pub cache_key: String,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            eps: CLUSTERING_EPS,
            min_samples: CLUSTERING_MIN_SAMPLES,
            metric: DistanceMetric::default(),
            match_threshold: GROUP_MATCH_THRESHOLD,
            refresh_period: CLUSTER_REFRESH_PERIOD,
            cache_key: CLUSTER_CACHE_KEY.to_string(),
        }
    }
}

struct Inner {
    config: ClusteringConfig,
    cache: Arc<PersistentCache>,
    groups: Mutex<Arc<Vec<ClusterGroup>>>,
    /// Held across a cache access and the swap that follows it, so a reload
    /// cannot install a grouping older than one just computed.
    sync: Mutex<()>,
    stop: StopSignal,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

/// Groups unlabeled face encodings and answers nearest-group lookups.
///
/// The grouping is swapped whole under a lock and persisted to the cache,
/// and a refresh thread reloads it so a grouping computed elsewhere
/// becomes visible. Clones share the same state.
#[derive(Clone)]
pub struct ClusteringStage {
    inner: Arc<Inner>,
}

impl ClusteringStage {
    /// Creates the stage, seeding it from any grouping already cached.
    pub fn new(config: ClusteringConfig, cache: Arc<PersistentCache>, global: &StopSignal) -> Self {
        let stage = Self {
            inner: Arc::new(Inner {
                config,
                cache,
                groups: Mutex::new(Arc::new(Vec::new())),
                sync: Mutex::new(()),
                stop: global.child(),
                refresher: Mutex::new(None),
            }),
        };
        stage.reload();
        stage
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.inner.config
    }

    /// Snapshot of the current grouping, ordered by id.
    pub fn groups(&self) -> Arc<Vec<ClusterGroup>> {
        Arc::clone(&self.lock_groups())
    }

    /// Clusters `encodings`, replaces the grouping and persists it.
    ///
    /// Every encoding lands in exactly one group; noise points get a
    /// singleton group each. Returns the number of groups.
    pub fn update_clusters(&self, encodings: &[Vec<f32>]) -> usize {
        let config = &self.inner.config;
        let started = Instant::now();
        let params = DbscanParams {
            eps: config.eps,
            min_samples: config.min_samples,
            metric: config.metric,
        };
        let labels = dbscan(encodings, &params);
        let groups = build_groups(&labels, encodings);
        let count = groups.len();
        let dense = groups.iter().filter(|g| !g.singleton).count();

        let _sync = lock(&self.inner.sync);
        self.persist(&groups);
        *self.lock_groups() = Arc::new(groups);
        log::info!(
            "Clustered {} encodings into {dense} groups and {} singletons in {:.1}ms",
            encodings.len(),
            count - dense,
            started.elapsed().as_secs_f64() * 1000.0
        );
        count
    }

    /// Name of the group with the member nearest to `encoding`, or
    /// `"Unknown"` when nothing lies within the match threshold.
    ///
    /// Equal distances resolve to the lowest group id.
    pub fn get_group_name(&self, encoding: &[f32]) -> String {
        let groups = self.groups();
        let config = &self.inner.config;
        let mut best: Option<(&ClusterGroup, f64)> = None;
        for group in groups.iter() {
            let Some(d) = group.nearest_distance(encoding, config.metric) else {
                continue;
            };
            if d > config.match_threshold {
                continue;
            }
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((group, d));
            }
        }
        best.map_or_else(|| UNKNOWN_LABEL.to_string(), |(g, _)| g.name.clone())
    }

    /// Replaces the grouping with the cached one, if any. Returns whether
    /// a cached grouping was found.
    pub fn reload(&self) -> bool {
        let key = &self.inner.config.cache_key;
        let _sync = lock(&self.inner.sync);
        match self.inner.cache.get::<Vec<ClusterGroup>>(key) {
            Some(mut groups) => {
                groups.sort_by_key(|g| g.id);
                log::debug!("Loaded {} cached groups", groups.len());
                *self.lock_groups() = Arc::new(groups);
                true
            }
            None => false,
        }
    }

    /// Spawns the refresh thread. Does nothing if it is already running.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut refresher = self.lock_refresher();
        if refresher.is_some() {
            return Ok(());
        }
        if self.inner.stop.is_set() {
            return Err(PipelineError::Stopped { stage: "clustering" });
        }
        let stage = self.clone();
        *refresher = Some(spawn_named("cluster-refresh", move || stage.run_refresh())?);
        log::info!(
            "Cluster refresh every {}s",
            self.inner.config.refresh_period.as_secs()
        );
        Ok(())
    }

    /// Stops the refresh thread and waits for it. Idempotent.
    pub fn stop(&self) {
        self.inner.stop.set();
        let handle = self.lock_refresher().take();
        if let Some(handle) = handle {
            join_logged("cluster-refresh", handle);
        }
    }

    fn run_refresh(&self) {
        while !self.inner.stop.wait_timeout(self.inner.config.refresh_period) {
            self.reload();
            let swept = self.inner.cache.cleanup_expired();
            if swept > 0 {
                log::debug!("Cache sweep removed {swept} files");
            }
        }
    }

    fn persist(&self, groups: &[ClusterGroup]) {
        let key = &self.inner.config.cache_key;
        if let Err(e) = self.inner.cache.set(key, groups, None) {
            log::warn!("Failed to persist face groups: {e}");
        }
    }

    fn lock_groups(&self) -> MutexGuard<'_, Arc<Vec<ClusterGroup>>> {
        lock(&self.inner.groups)
    }

    fn lock_refresher(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        lock(&self.inner.refresher)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
