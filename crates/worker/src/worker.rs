//! Replicated prediction worker
//!
//! A worker owns one [`ModelStore`]. Requests are queued on a bounded channel
//! and served one at a time, in arrival order, by a dedicated thread (engine
//! calls block). Every request carries its own `oneshot` reply channel, so
//! concurrent callers can never receive each other's scores. An engine panic
//! fails only the request that triggered it. A tokio task re-runs
//! reconciliation on a fixed interval next to the request loop.

use crate::store::{ModelStore, ReconcileSummary};
use scored_common::{Result, ScoredError, ServeConfig};
use scored_proto::{Example, ModelInfo, Score};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace};
use uuid::Uuid;

/// Map a raw engine output into (0, 1)
pub fn logistic(raw: f64) -> f64 {
    1.0 / (1.0 + (-raw).exp())
}

/// Worker tuning knobs
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Time between reconciliation passes after the initial load
    pub reload_interval: Duration,

    /// Requests queued before callers wait
    pub queue_capacity: usize,
}

impl WorkerSettings {
    pub fn from_config(config: &ServeConfig) -> Self {
        Self {
            reload_interval: config.reload_interval(),
            queue_capacity: config.queue_capacity,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            reload_interval: Duration::from_secs(30),
            queue_capacity: 64,
        }
    }
}

/// Sending side of the reload failure channel, one clone per worker
pub type FailureSender = mpsc::UnboundedSender<ScoredError>;

/// Fatal reconciliation errors reported by workers' reloaders
pub struct ReloadFailures {
    rx: mpsc::UnboundedReceiver<ScoredError>,
}

/// Create the channel workers use to report fatal reload errors
pub fn reload_failures() -> (FailureSender, ReloadFailures) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ReloadFailures { rx })
}

impl ReloadFailures {
    /// Next reported failure; `None` once every worker is gone
    pub async fn next(&mut self) -> Option<ScoredError> {
        self.rx.recv().await
    }

    /// Wait for the first failure, forever if none ever comes
    pub async fn fatal(&mut self) -> ScoredError {
        match self.rx.recv().await {
            Some(err) => err,
            None => std::future::pending().await,
        }
    }
}

/// One queued prediction request
struct Job {
    id: Uuid,
    model: String,
    examples: Vec<Example>,
    reply: oneshot::Sender<Result<Vec<Score>>>,
}

/// A replica: one model store, one request loop, one reloader
pub struct Worker {
    id: usize,
    store: Arc<ModelStore>,
    jobs: mpsc::Sender<Job>,
    reloader: JoinHandle<()>,
}

impl Worker {
    /// Load every model, then start the request loop and the reloader
    ///
    /// The initial reconciliation runs on the calling thread and its errors
    /// are returned. Must be called within a tokio runtime.
    pub fn spawn(
        id: usize,
        store: ModelStore,
        settings: &WorkerSettings,
        failures: FailureSender,
    ) -> Result<Self> {
        let summary = store.reconcile()?;
        info!(
            "Worker {} loaded {} models from {}",
            id,
            summary.total,
            store.dir().display()
        );

        let store = Arc::new(store);
        let (jobs, queue) = mpsc::channel(settings.queue_capacity);

        let loop_store = Arc::clone(&store);
        thread::Builder::new()
            .name(format!("scored-worker-{}", id))
            .spawn(move || run(id, loop_store, queue))?;

        let reloader = tokio::spawn(reload_loop(
            id,
            Arc::clone(&store),
            settings.reload_interval,
            failures,
        ));

        Ok(Self {
            id,
            store,
            jobs,
            reloader,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Score `examples` with `model`; scores come back in example order
    pub async fn predict(&self, model: &str, examples: Vec<Example>) -> Result<Vec<Score>> {
        let expected = examples.len();
        let (reply, response) = oneshot::channel();

        let job = Job {
            id: Uuid::new_v4(),
            model: model.to_string(),
            examples,
            reply,
        };

        self.jobs.send(job).await.map_err(|_| {
            ScoredError::worker_unavailable(format!("worker {} request loop has stopped", self.id))
        })?;

        let scores = response.await.map_err(|_| {
            ScoredError::worker_unavailable(format!("worker {} dropped the request", self.id))
        })??;

        if scores.len() != expected {
            return Err(ScoredError::LengthMismatch {
                expected,
                actual: scores.len(),
            });
        }

        Ok(scores)
    }

    /// Names and load times of this replica's models
    pub fn active_models(&self) -> Vec<ModelInfo> {
        self.store.snapshot()
    }

    /// Run a reconciliation pass now, on the calling thread
    pub fn reconcile_now(&self) -> Result<ReconcileSummary> {
        self.store.reconcile()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // the request thread exits once `jobs` is dropped
        self.reloader.abort();
    }
}

/// Serve queued requests one at a time until every sender is gone
fn run(id: usize, store: Arc<ModelStore>, mut queue: mpsc::Receiver<Job>) {
    debug!("Worker {} request loop running", id);

    while let Some(job) = queue.blocking_recv() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            score(&store, &job.model, &job.examples)
        }))
        .unwrap_or_else(|cause| {
            let reason = panic_reason(cause.as_ref());
            error!("Worker {} request {}: engine panicked: {}", id, job.id, reason);
            Err(ScoredError::engine(format!("engine panicked: {}", reason)))
        });

        match &result {
            Ok(scores) => trace!(
                "Worker {} request {}: {} scores from {}",
                id,
                job.id,
                scores.len(),
                job.model
            ),
            Err(e) => debug!("Worker {} request {} failed: {}", id, job.id, e),
        }

        if job.reply.send(result).is_err() {
            debug!("Worker {} request {}: caller went away", id, job.id);
        }
    }

    debug!("Worker {} request loop stopped", id);
}

fn score(store: &ModelStore, model: &str, examples: &[Example]) -> Result<Vec<Score>> {
    // the store lock is held only for the lookup
    let handle = store
        .lookup(model)
        .ok_or_else(|| ScoredError::model_not_found(model))?;

    let raw = handle.predict_batch(examples)?;
    Ok(raw.into_iter().map(logistic).collect())
}

fn panic_reason(cause: &(dyn Any + Send)) -> String {
    if let Some(msg) = cause.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = cause.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown cause".to_string()
    }
}

async fn reload_loop(
    id: usize,
    store: Arc<ModelStore>,
    every: Duration,
    failures: FailureSender,
) {
    let mut interval = time::interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        debug!("Worker {} reloading", id);

        let pass = Arc::clone(&store);
        let outcome = match task::spawn_blocking(move || pass.reconcile()).await {
            Ok(outcome) => outcome,
            Err(e) => Err(ScoredError::worker_unavailable(format!(
                "worker {} reconciliation task failed: {}",
                id, e
            ))),
        };

        if let Err(e) = outcome {
            error!("Worker {} reconciliation failed: {}", id, e);
            let _ = failures.send(e);
            return;
        }
    }
}
