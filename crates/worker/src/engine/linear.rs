//! Plain-text linear models
//!
//! A model file holds one `feature weight` (or `feature:weight`) pair per
//! line; blank lines and `#` comments are skipped and the `Constant` feature
//! is the bias. Examples use the Vowpal Wabbit line format
//! (`label | f:v f ...`), so the same example strings work with either
//! adapter.

use super::{Engine, EngineHandle};
use scored_common::{Result, ScoredError};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Feature name that carries the bias term
pub const BIAS_FEATURE: &str = "Constant";

/// Engine adapter for plain-text linear models
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearEngine;

impl Engine for LinearEngine {
    fn load(&self, path: &Path) -> Result<Box<dyn EngineHandle>> {
        let text = fs::read_to_string(path).map_err(|e| ScoredError::engine_load(path, e))?;
        let model = LinearModel::parse(&text).map_err(|reason| ScoredError::engine_load(path, reason))?;
        Ok(Box::new(model))
    }
}

/// Weights of one linear model
#[derive(Debug, Clone, Default)]
pub struct LinearModel {
    weights: HashMap<String, f64>,
    bias: f64,
}

impl LinearModel {
    /// Parse the text model format
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut model = LinearModel::default();

        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (feature, weight) = line
                .rsplit_once(|c: char| c == ':' || c.is_whitespace())
                .ok_or_else(|| format!("line {}: expected `feature weight`", idx + 1))?;

            let feature = feature.trim();
            if feature.is_empty() {
                return Err(format!("line {}: missing feature name", idx + 1));
            }

            let weight: f64 = weight
                .parse()
                .map_err(|_| format!("line {}: invalid weight {:?}", idx + 1, weight))?;

            if feature == BIAS_FEATURE {
                model.bias = weight;
            } else {
                model.weights.insert(feature.to_string(), weight);
            }
        }

        Ok(model)
    }

    /// Number of non-bias weights
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl EngineHandle for LinearModel {
    fn predict(&self, example: &str) -> Result<f64> {
        let mut raw = self.bias;

        for token in feature_tokens(example) {
            let (feature, value) = match token.rsplit_once(':') {
                Some((feature, value)) => {
                    let value: f64 = value.parse().map_err(|_| {
                        ScoredError::engine(format!("invalid feature value in {:?}", token))
                    })?;
                    (feature, value)
                }
                None => (token, 1.0),
            };

            if let Some(weight) = self.weights.get(feature) {
                raw += weight * value;
            }
        }

        Ok(raw)
    }
}

/// Feature tokens of an example; the label and namespace names are dropped
fn feature_tokens(example: &str) -> Vec<&str> {
    let Some((_label, features)) = example.split_once('|') else {
        return example.split_whitespace().collect();
    };

    features
        .split('|')
        .flat_map(|segment| {
            let mut tokens = segment.split_whitespace();
            // a name glued to the bar (`|user age:3`) is a namespace
            if !segment.starts_with(char::is_whitespace) {
                tokens.next();
            }
            tokens
        })
        .collect()
}
