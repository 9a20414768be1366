//! scored worker
//!
//! Model lifecycle for one replica: the engine capability, the per-worker
//! model store with its directory reconciliation, and the serialized
//! request loop that scores examples against the store.

pub mod engine;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;

pub use engine::{Engine, EngineHandle, SharedHandle};
pub use store::{ModelStore, ReconcileSummary};
pub use worker::{logistic, reload_failures, FailureSender, ReloadFailures, Worker, WorkerSettings};
