//! scored common library
//!
//! This crate contains shared code used across scored components.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::{EngineKind, ServeConfig};
pub use error::{Result, ScoredError};
pub use metrics::{MetricsRegistry, ModelMetrics, RequestMetrics};
