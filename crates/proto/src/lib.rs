//! scored wire types
//!
//! Shapes exchanged between the worker pool and the HTTP transport. A
//! prediction request body is a JSON array of example strings and the
//! response is a JSON array of scores, index-aligned with the examples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One textual input to score; the format belongs to the engine
pub type Example = String;

/// Score for one example, in (0, 1)
pub type Score = f64;

/// A loaded model as reported by `/models`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub last_modified: DateTime<Utc>,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>, last_modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            last_modified: last_modified.into(),
        }
    }
}

/// Query string of a prediction request (`/p?m=<model>`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictQuery {
    /// Model name
    pub m: Option<String>,
}

impl PredictQuery {
    /// The model name, if present and not blank
    pub fn model(&self) -> Option<&str> {
        self.m
            .as_deref()
            .filter(|m| !m.trim_matches(|c| c == '\r' || c == '\n' || c == ' ').is_empty())
    }
}

/// Body of an error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
