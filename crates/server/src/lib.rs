//! scored server
//!
//! The worker pool that routes predictions across replicated workers, the
//! HTTP transport in front of it, and process bootstrap helpers.

pub mod http;
pub mod pool;
pub mod process;

pub use http::{router, ApiError, AppState};
pub use pool::WorkerPool;
