//! Prediction engine capability
//!
//! The worker never scores anything itself. It turns model files into
//! [`EngineHandle`]s through an [`Engine`] and asks the handles for raw
//! scores. Releasing a handle is dropping it: adapters free their native
//! resources in `Drop`, which runs once, after the last reference is gone.

pub mod linear;
#[cfg(feature = "vw")]
pub mod vw;

use scored_common::{EngineKind, Result, ScoredError};
use std::path::Path;
use std::sync::Arc;

pub use linear::LinearEngine;
#[cfg(feature = "vw")]
pub use vw::VwEngine;

/// Builds engine handles from model files
pub trait Engine: Send + Sync {
    /// Load one model file
    fn load(&self, path: &Path) -> Result<Box<dyn EngineHandle>>;
}

/// One loaded model
pub trait EngineHandle: Send + Sync {
    /// Raw (pre-logistic) output for a single example
    fn predict(&self, example: &str) -> Result<f64>;

    /// Raw outputs for a batch, one per example, in order
    fn predict_batch(&self, examples: &[String]) -> Result<Vec<f64>> {
        examples.iter().map(|example| self.predict(example)).collect()
    }
}

/// Reference-counted handle as stored in a model store
pub type SharedHandle = Arc<dyn EngineHandle>;

/// Build the configured engine adapter
pub fn from_kind(kind: EngineKind) -> Result<Arc<dyn Engine>> {
    match kind {
        EngineKind::Linear => Ok(Arc::new(LinearEngine)),
        #[cfg(feature = "vw")]
        EngineKind::Vw => Ok(Arc::new(VwEngine::new())),
        #[cfg(not(feature = "vw"))]
        EngineKind::Vw => Err(ScoredError::config(
            "the vw engine requires building with the `vw` feature",
        )),
    }
}
