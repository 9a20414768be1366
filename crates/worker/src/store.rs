//! Per-worker model store and directory reconciliation
//!
//! A store maps model names (file stems) to engine handles and the
//! modification time each handle was loaded from. One mutex guards both
//! maps. Engine loads run outside the lock; only the swap takes it, and the
//! displaced handle is dropped after the lock is released, so a lookup never
//! sees a released handle. Whole passes are serialized by a second mutex
//! that lookups never take.

use crate::engine::{Engine, SharedHandle};
use parking_lot::Mutex;
use scored_common::{ModelMetrics, Result, ScoredError};
use scored_proto::ModelInfo;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Handles built for new or updated files
    pub loaded: usize,

    /// Models dropped because their file disappeared
    pub unloaded: usize,

    /// Files the engine refused
    pub failed: usize,

    /// Models in the store after the pass
    pub total: usize,
}

/// Per-worker mapping from model name to engine handle
pub struct ModelStore {
    /// Metric label of the owning worker
    worker: String,
    dir: PathBuf,
    suffix: String,
    engine: Arc<dyn Engine>,
    models: Mutex<Models>,
    /// Held for the duration of a reconciliation pass
    pass: Mutex<()>,
    metrics: ModelMetrics,
}

#[derive(Default)]
struct Models {
    handles: HashMap<String, SharedHandle>,
    modified: HashMap<String, SystemTime>,
}

/// A model file seen during a scan
#[derive(Debug)]
struct ModelFile {
    name: String,
    path: PathBuf,
    modified: SystemTime,
}

impl ModelStore {
    /// Create an empty store over `dir`; `suffix` includes the leading dot
    pub fn new(
        worker: impl Into<String>,
        dir: impl Into<PathBuf>,
        suffix: impl Into<String>,
        engine: Arc<dyn Engine>,
        metrics: ModelMetrics,
    ) -> Self {
        Self {
            worker: worker.into(),
            dir: dir.into(),
            suffix: suffix.into(),
            engine,
            models: Mutex::new(Models::default()),
            pass: Mutex::new(()),
            metrics,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Align the store with the models directory
    ///
    /// New files and files strictly newer than their loaded version are
    /// (re)loaded; models whose file is gone are released. Listing or stat
    /// failures abort the pass with [`ScoredError::ReconciliationIo`]. A file
    /// the engine cannot load is skipped and retried on the next pass, and
    /// any previously loaded version stays in service.
    ///
    /// Concurrent callers run one pass after the other, each scanning the
    /// directory afresh.
    pub fn reconcile(&self) -> Result<ReconcileSummary> {
        let _pass = self.pass.lock();
        let _timer = self.metrics.reconcile_duration.start_timer();
        let mut summary = ReconcileSummary::default();

        let on_disk = self.scan()?;

        for file in &on_disk {
            if !self.is_stale(&file.name, file.modified) {
                continue;
            }

            match self.engine.load(&file.path) {
                Ok(handle) => {
                    self.install(&file.name, Arc::from(handle), file.modified);
                    self.metrics.loads_total.with_label_values(&[self.worker.as_str()]).inc();
                    summary.loaded += 1;
                    info!(
                        "worker {}: loaded {} as {}",
                        self.worker,
                        file.path.display(),
                        file.name
                    );
                }
                Err(e) => {
                    self.metrics
                        .load_failures_total
                        .with_label_values(&[self.worker.as_str()])
                        .inc();
                    summary.failed += 1;
                    warn!("worker {}: skipping {}: {}", self.worker, file.name, e);
                }
            }
        }

        let present: HashSet<&str> = on_disk.iter().map(|file| file.name.as_str()).collect();
        let released = self.remove_absent(&present);
        summary.unloaded = released.len();

        for (name, handle) in released {
            drop(handle);
            self.metrics.unloads_total.with_label_values(&[self.worker.as_str()]).inc();
            info!("worker {}: unloaded {}", self.worker, name);
        }

        summary.total = self.len();
        self.metrics
            .loaded
            .with_label_values(&[self.worker.as_str()])
            .set(summary.total as i64);

        debug!(
            "worker {}: have {} models ({} loaded, {} unloaded, {} failed)",
            self.worker, summary.total, summary.loaded, summary.unloaded, summary.failed
        );

        Ok(summary)
    }

    /// Handle for `name`, if loaded
    pub fn lookup(&self, name: &str) -> Option<SharedHandle> {
        self.models.lock().handles.get(name).cloned()
    }

    /// Names and load times of every loaded model, sorted by name
    pub fn snapshot(&self) -> Vec<ModelInfo> {
        let models = self.models.lock();
        let mut active: Vec<ModelInfo> = models
            .handles
            .keys()
            .filter_map(|name| {
                models
                    .modified
                    .get(name)
                    .map(|modified| ModelInfo::new(name.clone(), *modified))
            })
            .collect();
        drop(models);

        active.sort_by(|a, b| a.name.cmp(&b.name));
        active
    }

    /// Number of loaded models
    pub fn len(&self) -> usize {
        self.models.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// List model files with their modification times
    fn scan(&self) -> Result<Vec<ModelFile>> {
        let entries =
            fs::read_dir(&self.dir).map_err(|e| ScoredError::reconciliation_io(&self.dir, e))?;

        let mut files = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| ScoredError::reconciliation_io(&self.dir, e))?;

            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(self.suffix.as_str()))
            else {
                continue;
            };
            if name.is_empty() {
                continue;
            }

            let path = entry.path();
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                // removed between the listing and the stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("worker {}: {} vanished during scan", self.worker, path.display());
                    continue;
                }
                Err(e) => return Err(ScoredError::reconciliation_io(&path, e)),
            };
            if !metadata.is_file() {
                continue;
            }

            let modified = metadata
                .modified()
                .map_err(|e| ScoredError::reconciliation_io(&path, e))?;

            files.push(ModelFile {
                name: name.to_string(),
                path,
                modified,
            });
        }

        Ok(files)
    }

    fn is_stale(&self, name: &str, on_disk: SystemTime) -> bool {
        self.models
            .lock()
            .modified
            .get(name)
            .map_or(true, |loaded| on_disk > *loaded)
    }

    fn install(&self, name: &str, handle: SharedHandle, modified: SystemTime) {
        let previous = {
            let mut models = self.models.lock();
            models.modified.insert(name.to_string(), modified);
            models.handles.insert(name.to_string(), handle)
        };

        // released only once the replacement is visible
        drop(previous);
    }

    fn remove_absent(&self, present: &HashSet<&str>) -> Vec<(String, SharedHandle)> {
        let mut models = self.models.lock();

        let gone: Vec<String> = models
            .handles
            .keys()
            .filter(|name| !present.contains(name.as_str()))
            .cloned()
            .collect();

        gone.into_iter()
            .filter_map(|name| {
                models.modified.remove(&name);
                models.handles.remove(&name).map(|handle| (name, handle))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mtime, write_model, FakeEngine};
    use scored_common::MetricsRegistry;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store(dir: &Path, engine: &FakeEngine) -> ModelStore {
        let metrics = MetricsRegistry::new().unwrap();
        ModelStore::new("0", dir, ".vw", Arc::new(engine.clone()), metrics.models)
    }

    fn names(store: &ModelStore) -> Vec<String> {
        store.snapshot().into_iter().map(|info| info.name).collect()
    }

    #[test]
    fn test_loads_only_model_files() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "a.vw", "len", mtime(1));
        write_model(dir.path(), "B.vw", "len", mtime(1));
        write_model(dir.path(), "notes.txt", "len", mtime(1));
        write_model(dir.path(), ".vw", "len", mtime(1));
        fs::create_dir(dir.path().join("nested.vw")).unwrap();

        let engine = FakeEngine::new();
        let store = store(dir.path(), &engine);
        let summary = store.reconcile().unwrap();

        assert_eq!(summary.loaded, 2);
        assert_eq!(summary.total, 2);
        assert_eq!(names(&store), vec!["B", "a"]);
        assert!(store.lookup("b").is_none());
        assert_eq!(engine.loads(), 2);
    }

    #[test]
    fn test_newer_file_swaps_handle_once() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "a.vw", "len v1", mtime(1));

        let engine = FakeEngine::new();
        let store = store(dir.path(), &engine);
        store.reconcile().unwrap();
        assert_eq!((engine.loads(), engine.releases()), (1, 0));

        write_model(dir.path(), "a.vw", "len v2", mtime(2));
        let summary = store.reconcile().unwrap();

        assert_eq!(summary.loaded, 1);
        assert_eq!((engine.loads(), engine.releases()), (2, 1));
        assert_eq!(store.snapshot(), vec![ModelInfo::new("a", mtime(2))]);

        // nothing changed, nothing reloaded
        store.reconcile().unwrap();
        assert_eq!((engine.loads(), engine.releases()), (2, 1));
    }

    #[test]
    fn test_same_or_older_mtime_is_not_reloaded() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "a.vw", "len", mtime(5));

        let engine = FakeEngine::new();
        let store = store(dir.path(), &engine);
        store.reconcile().unwrap();

        write_model(dir.path(), "a.vw", "len", mtime(5));
        store.reconcile().unwrap();
        write_model(dir.path(), "a.vw", "len", mtime(4));
        store.reconcile().unwrap();

        assert_eq!(engine.loads(), 1);
    }

    #[test]
    fn test_deleted_file_is_released_at_next_pass() {
        let dir = TempDir::new().unwrap();
        let path = write_model(dir.path(), "a.vw", "len", mtime(1));
        write_model(dir.path(), "b.vw", "len", mtime(1));

        let engine = FakeEngine::new();
        let store = store(dir.path(), &engine);
        store.reconcile().unwrap();

        fs::remove_file(path).unwrap();
        assert!(store.lookup("a").is_some());

        let summary = store.reconcile().unwrap();

        assert_eq!(summary.unloaded, 1);
        assert!(store.lookup("a").is_none());
        assert_eq!(names(&store), vec!["b"]);
        assert_eq!(engine.releases(), 1);
    }

    #[test]
    fn test_reappearing_file_with_older_mtime_is_loaded() {
        let dir = TempDir::new().unwrap();
        let path = write_model(dir.path(), "a.vw", "len", mtime(9));

        let engine = FakeEngine::new();
        let store = store(dir.path(), &engine);
        store.reconcile().unwrap();

        fs::remove_file(path).unwrap();
        store.reconcile().unwrap();

        write_model(dir.path(), "a.vw", "len", mtime(3));
        store.reconcile().unwrap();

        assert!(store.lookup("a").is_some());
        assert_eq!(engine.loads(), 2);
    }

    #[test]
    fn test_failed_load_keeps_previous_handle() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "a.vw", "len", mtime(1));

        let engine = FakeEngine::new();
        let store = store(dir.path(), &engine);
        store.reconcile().unwrap();

        write_model(dir.path(), "a.vw", "corrupt", mtime(2));
        let summary = store.reconcile().unwrap();

        assert_eq!(summary.failed, 1);
        assert!(store.lookup("a").is_some());
        assert_eq!(engine.releases(), 0);
        assert_eq!(store.snapshot(), vec![ModelInfo::new("a", mtime(1))]);

        // retried on the next pass once fixed
        write_model(dir.path(), "a.vw", "len", mtime(3));
        let summary = store.reconcile().unwrap();

        assert_eq!(summary.loaded, 1);
        assert_eq!((engine.loads(), engine.releases()), (2, 1));
    }

    #[test]
    fn test_concurrent_passes_do_not_unload_fresh_models() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "slow.vw", "slow", mtime(1));

        let engine = FakeEngine::new();
        let store = Arc::new(store(dir.path(), &engine));

        let first = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.reconcile().unwrap())
        };

        // the first pass is still inside the slow load
        std::thread::sleep(Duration::from_millis(50));
        write_model(dir.path(), "n.vw", "len", mtime(1));
        store.reconcile().unwrap();
        first.join().unwrap();

        assert_eq!(names(&store), vec!["n", "slow"]);
        assert_eq!((engine.loads(), engine.releases()), (2, 0));

        store.reconcile().unwrap();
        assert_eq!(names(&store), vec!["n", "slow"]);
    }

    #[test]
    fn test_failed_new_file_is_not_listed() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "broken.vw", "corrupt", mtime(1));

        let engine = FakeEngine::new();
        let store = store(dir.path(), &engine);
        let summary = store.reconcile().unwrap();

        assert_eq!(summary, ReconcileSummary { loaded: 0, unloaded: 0, failed: 1, total: 0 });
        assert!(store.is_empty());
    }

    #[test]
    fn test_in_flight_handle_outlives_swap() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "a.vw", "len", mtime(1));

        let engine = FakeEngine::new();
        let store = store(dir.path(), &engine);
        store.reconcile().unwrap();

        let in_flight = store.lookup("a").unwrap();
        write_model(dir.path(), "a.vw", "len", mtime(2));
        store.reconcile().unwrap();

        assert_eq!(engine.releases(), 0);
        assert_eq!(in_flight.predict("abc").unwrap(), 3.0);

        drop(in_flight);
        assert_eq!(engine.releases(), 1);
        assert_eq!(engine.live(), 1);
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let engine = FakeEngine::new();
        let store = store(&missing, &engine);

        let err = store.reconcile().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, ScoredError::ReconciliationIo { ref path, .. } if path == &missing));
    }

    #[test]
    fn test_dropping_store_releases_every_handle() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "a.vw", "len", mtime(1));
        write_model(dir.path(), "b.vw", "echo", mtime(1));

        let engine = FakeEngine::new();
        let store = store(dir.path(), &engine);
        store.reconcile().unwrap();
        drop(store);

        assert_eq!((engine.loads(), engine.releases()), (2, 2));
    }
}
