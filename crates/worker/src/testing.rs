//! Instrumented fake engine for tests
//!
//! The first word of a model file picks the behavior of its handle:
//!
//! - `len` (or an empty file): raw score is the example's byte length
//! - `echo`: raw score is the example parsed as a number
//! - `short`: like `len`, but batches come back one score short
//! - `slow`: like `len`, but loading takes [`SLOW_LOAD`]
//! - `panic`: like `len`, but the engine panics on the example `boom`
//! - `corrupt`: the file fails to load
//!
//! Anything after the first word is ignored, so `len v2` can stand in for a
//! retrained model. Loads, releases, and predictions are counted.

use crate::engine::{Engine, EngineHandle};
use scored_common::{Result, ScoredError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

/// Load time of a `slow` model
pub const SLOW_LOAD: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct Counters {
    loads: AtomicUsize,
    releases: AtomicUsize,
    predictions: AtomicUsize,
}

/// Fake engine that counts handle constructions and releases
#[derive(Debug, Clone, Default)]
pub struct FakeEngine {
    counters: Arc<Counters>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles built so far
    pub fn loads(&self) -> usize {
        self.counters.loads.load(Ordering::SeqCst)
    }

    /// Handles dropped so far
    pub fn releases(&self) -> usize {
        self.counters.releases.load(Ordering::SeqCst)
    }

    /// Single-example engine calls so far
    pub fn predictions(&self) -> usize {
        self.counters.predictions.load(Ordering::SeqCst)
    }

    /// Handles built and not yet released
    pub fn live(&self) -> usize {
        self.loads() - self.releases()
    }
}

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Length,
    Echo,
    Short,
    Panic,
}

impl Engine for FakeEngine {
    fn load(&self, path: &Path) -> Result<Box<dyn EngineHandle>> {
        let body = fs::read_to_string(path).map_err(|e| ScoredError::engine_load(path, e))?;

        let behavior = match body.split_whitespace().next() {
            None | Some("len") => Behavior::Length,
            Some("echo") => Behavior::Echo,
            Some("short") => Behavior::Short,
            Some("panic") => Behavior::Panic,
            Some("slow") => {
                thread::sleep(SLOW_LOAD);
                Behavior::Length
            }
            Some("corrupt") => return Err(ScoredError::engine_load(path, "corrupt model")),
            Some(other) => {
                return Err(ScoredError::engine_load(path, format!("unknown behavior {:?}", other)))
            }
        };

        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHandle {
            behavior,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeHandle {
    behavior: Behavior,
    counters: Arc<Counters>,
}

impl EngineHandle for FakeHandle {
    fn predict(&self, example: &str) -> Result<f64> {
        self.counters.predictions.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::Panic if example == "boom" => panic!("engine crashed on {:?}", example),
            Behavior::Length | Behavior::Short | Behavior::Panic => Ok(example.len() as f64),
            Behavior::Echo => example
                .trim()
                .parse()
                .map_err(|_| ScoredError::engine(format!("not a number: {:?}", example))),
        }
    }

    fn predict_batch(&self, examples: &[String]) -> Result<Vec<f64>> {
        let mut scores = examples
            .iter()
            .map(|example| self.predict(example))
            .collect::<Result<Vec<_>>>()?;

        if let Behavior::Short = self.behavior {
            scores.pop();
        }

        Ok(scores)
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// A fixed, distinct modification time (`step` seconds past a base time)
pub fn mtime(step: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + step)
}

/// Write a model file and pin its modification time
pub fn write_model(dir: &Path, file_name: &str, body: &str, modified: SystemTime) -> PathBuf {
    let path = dir.join(file_name);
    fs::write(&path, body).expect("write model file");
    fs::File::options()
        .write(true)
        .open(&path)
        .and_then(|file| file.set_modified(modified))
        .expect("set model mtime");
    path
}
