//! Request routing across replicated workers
//!
//! Every worker holds a full, independently reloaded copy of the models
//! directory. Predictions go to a worker chosen uniformly at random; model
//! listings come from the first worker only and may briefly disagree with the
//! other replicas while a reload is in flight.

use rand::Rng;
use scored_common::{MetricsRegistry, ModelMetrics, Result, ScoredError, ServeConfig};
use scored_proto::{Example, ModelInfo, Score};
use scored_worker::{reload_failures, Engine, ModelStore, ReloadFailures, Worker, WorkerSettings};
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info};

/// Fixed set of replicated workers
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Build `config.workers` workers, each loading the whole models directory
    ///
    /// Returns the pool and the channel on which workers report fatal
    /// reconciliation errors after startup.
    pub fn start(
        config: &ServeConfig,
        engine: Arc<dyn Engine>,
        metrics: &MetricsRegistry,
    ) -> Result<(Self, ReloadFailures)> {
        Self::start_with(config, engine, metrics.models.clone())
    }

    /// Like [`WorkerPool::start`], with the initial loads on the blocking pool
    ///
    /// Keeps the runtime serving other tasks while every worker loads the
    /// whole models directory.
    pub async fn launch(
        config: &ServeConfig,
        engine: Arc<dyn Engine>,
        metrics: &MetricsRegistry,
    ) -> Result<(Self, ReloadFailures)> {
        let config = config.clone();
        let models = metrics.models.clone();

        task::spawn_blocking(move || Self::start_with(&config, engine, models))
            .await
            .map_err(|e| ScoredError::worker_unavailable(format!("pool startup failed: {}", e)))?
    }

    fn start_with(
        config: &ServeConfig,
        engine: Arc<dyn Engine>,
        models: ModelMetrics,
    ) -> Result<(Self, ReloadFailures)> {
        let settings = WorkerSettings::from_config(config);
        let (failure_tx, failures) = reload_failures();

        let workers = (0..config.workers)
            .map(|id| {
                let store = ModelStore::new(
                    id.to_string(),
                    &config.models_dir,
                    config.model_suffix(),
                    Arc::clone(&engine),
                    models.clone(),
                );
                Worker::spawn(id, store, &settings, failure_tx.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        let pool = Self::from_workers(workers)?;
        info!("Started {} workers over {}", pool.len(), config.models_dir.display());

        Ok((pool, failures))
    }

    /// Wrap already running workers
    pub fn from_workers(workers: Vec<Worker>) -> Result<Self> {
        if workers.is_empty() {
            return Err(ScoredError::config("a worker pool needs at least one worker"));
        }
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Models as seen by the first worker
    pub fn active_models(&self) -> Vec<ModelInfo> {
        self.workers
            .first()
            .map(Worker::active_models)
            .unwrap_or_default()
    }

    /// Pick a worker uniformly at random
    pub fn select_worker(&self) -> &Worker {
        let idx = rand::thread_rng().gen_range(0..self.workers.len());
        &self.workers[idx]
    }

    /// Score `examples` with `model` on a randomly chosen worker
    pub async fn predict(&self, model: &str, examples: Vec<Example>) -> Result<Vec<Score>> {
        let worker = self.select_worker();
        debug!("Routing {} examples for {} to worker {}", examples.len(), model, worker.id());
        worker.predict(model, examples).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scored_worker::logistic;
    use scored_worker::testing::{mtime, write_model, FakeEngine, SLOW_LOAD};
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn start(dir: &Path, workers: usize, engine: &FakeEngine) -> (WorkerPool, ReloadFailures) {
        let config = ServeConfig {
            models_dir: dir.to_path_buf(),
            workers,
            ..ServeConfig::default()
        };
        let metrics = MetricsRegistry::new().unwrap();
        WorkerPool::start(&config, Arc::new(engine.clone()), &metrics).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_worker_loads_its_own_replica() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "a.vw", "len", mtime(1));
        write_model(dir.path(), "b.vw", "len", mtime(1));

        let engine = FakeEngine::new();
        let (pool, _failures) = start(dir.path(), 3, &engine);

        assert_eq!(pool.len(), 3);
        assert_eq!(engine.loads(), 6);
        for worker in pool.workers() {
            assert_eq!(worker.active_models().len(), 2);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_predict_through_pool() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "a.vw", "len", mtime(1));

        let engine = FakeEngine::new();
        let (pool, _failures) = start(dir.path(), 4, &engine);

        let examples = vec!["x".to_string(), "yy".to_string(), "zzz".to_string()];
        let scores = pool.predict("a", examples).await.unwrap();

        assert_eq!(scores, vec![logistic(1.0), logistic(2.0), logistic(3.0)]);

        let err = pool.predict("missing", vec!["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, ScoredError::ModelNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_active_models_reports_first_worker_only() {
        let dir = TempDir::new().unwrap();
        let path = write_model(dir.path(), "a.vw", "len", mtime(1));

        let engine = FakeEngine::new();
        let (pool, _failures) = start(dir.path(), 2, &engine);

        fs::remove_file(path).unwrap();
        pool.workers()[1].reconcile_now().unwrap();

        // worker 1 dropped the model, worker 0 has not reloaded yet
        assert_eq!(pool.active_models(), vec![ModelInfo::new("a", mtime(1))]);

        pool.workers()[0].reconcile_now().unwrap();
        assert!(pool.active_models().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_routing_spreads_over_diverged_replicas() {
        let dir = TempDir::new().unwrap();
        let path = write_model(dir.path(), "a.vw", "len", mtime(1));

        let engine = FakeEngine::new();
        let (pool, _failures) = start(dir.path(), 4, &engine);

        fs::remove_file(path).unwrap();
        pool.workers()[0].reconcile_now().unwrap();

        let mut found = 0;
        let mut not_found = 0;
        for _ in 0..200 {
            match pool.predict("a", vec!["x".to_string()]).await {
                Ok(_) => found += 1,
                Err(ScoredError::ModelNotFound(_)) => not_found += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert!(found > 0 && not_found > 0, "found={} not_found={}", found, not_found);
    }

    #[tokio::test]
    async fn test_launch_loads_off_the_runtime() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "slow.vw", "slow", mtime(1));

        let config = ServeConfig {
            models_dir: dir.path().to_path_buf(),
            workers: 2,
            ..ServeConfig::default()
        };
        let metrics = MetricsRegistry::new().unwrap();
        let engine = FakeEngine::new();

        // single-threaded runtime: the timer only fires if launch yields
        let launched = WorkerPool::launch(&config, Arc::new(engine.clone()), &metrics);
        let ticked = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Instant::now()
        };
        let ((started, done), ticked) =
            tokio::join!(async { (launched.await, Instant::now()) }, ticked);

        let (pool, _failures) = started.unwrap();
        assert!(ticked < done);
        assert_eq!(pool.len(), 2);
        assert_eq!(engine.loads(), 2);
        assert!(done.duration_since(ticked) >= SLOW_LOAD);
    }

    #[tokio::test]
    async fn test_start_fails_fast_on_missing_directory() {
        let root = TempDir::new().unwrap();
        let config = ServeConfig {
            models_dir: root.path().join("missing"),
            workers: 2,
            ..ServeConfig::default()
        };
        let metrics = MetricsRegistry::new().unwrap();

        let err = WorkerPool::start(&config, Arc::new(FakeEngine::new()), &metrics)
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_pool_needs_a_worker() {
        assert!(matches!(
            WorkerPool::from_workers(Vec::new()),
            Err(ScoredError::Config(_))
        ));
    }
}
