//! Metrics collection for scored
//!
//! This module provides Prometheus metrics for observability. The registry is
//! created once by the binary and handed to the worker pool and the HTTP
//! layer; there is no process-wide instance.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;

use crate::error::Result;

/// Metrics registry for scored
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub requests: RequestMetrics,
    pub models: ModelMetrics,
}

/// Request-path metrics
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    /// Prediction requests answered successfully
    pub predictions_total: IntCounter,

    /// Requests with no model name
    pub no_model: IntCounter,

    /// Requests whose body could not be read
    pub read_errors: IntCounter,

    /// Request bodies or responses that failed JSON handling
    pub json_errors: IntCounter,

    /// Predictions that failed inside the pool
    pub prediction_errors: IntCounter,

    /// Number of examples per prediction request
    pub examples_per_request: Histogram,

    /// Prediction request duration
    pub request_duration: Histogram,
}

/// Model lifecycle metrics, labelled by worker
#[derive(Debug, Clone)]
pub struct ModelMetrics {
    /// Engine handles built
    pub loads_total: IntCounterVec,

    /// Model files the engine refused
    pub load_failures_total: IntCounterVec,

    /// Models dropped because their file disappeared
    pub unloads_total: IntCounterVec,

    /// Models currently loaded
    pub loaded: IntGaugeVec,

    /// Reconciliation pass duration
    pub reconcile_duration: Histogram,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        // Request metrics
        let predictions_total = IntCounter::new(
            "scored_predictions_total",
            "Total number of successful prediction requests",
        )?;

        let no_model = IntCounter::new(
            "scored_no_model_total",
            "Prediction requests without a model name",
        )?;

        let read_errors = IntCounter::new(
            "scored_request_read_errors_total",
            "Prediction requests whose body could not be read",
        )?;

        let json_errors = IntCounter::new(
            "scored_json_errors_total",
            "JSON decoding or encoding failures",
        )?;

        let prediction_errors = IntCounter::new(
            "scored_prediction_errors_total",
            "Prediction requests that failed in the worker pool",
        )?;

        let examples_per_request = Histogram::with_opts(
            HistogramOpts::new(
                "scored_examples_per_request",
                "Number of examples per prediction request",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
        )?;

        let request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "scored_request_duration_seconds",
                "Prediction request duration in seconds",
            )
            .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;

        // Model metrics
        let loads_total = IntCounterVec::new(
            Opts::new("scored_model_loads_total", "Engine handles built from model files"),
            &["worker"],
        )?;

        let load_failures_total = IntCounterVec::new(
            Opts::new(
                "scored_model_load_failures_total",
                "Model files the engine failed to load",
            ),
            &["worker"],
        )?;

        let unloads_total = IntCounterVec::new(
            Opts::new(
                "scored_model_unloads_total",
                "Models released after their file disappeared",
            ),
            &["worker"],
        )?;

        let loaded = IntGaugeVec::new(
            Opts::new("scored_models_loaded", "Models currently loaded"),
            &["worker"],
        )?;

        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "scored_reconcile_duration_seconds",
                "Duration of a models directory reconciliation pass",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(predictions_total.clone()))?;
        registry.register(Box::new(no_model.clone()))?;
        registry.register(Box::new(read_errors.clone()))?;
        registry.register(Box::new(json_errors.clone()))?;
        registry.register(Box::new(prediction_errors.clone()))?;
        registry.register(Box::new(examples_per_request.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        registry.register(Box::new(loads_total.clone()))?;
        registry.register(Box::new(load_failures_total.clone()))?;
        registry.register(Box::new(unloads_total.clone()))?;
        registry.register(Box::new(loaded.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        let requests = RequestMetrics {
            predictions_total,
            no_model,
            read_errors,
            json_errors,
            prediction_errors,
            examples_per_request,
            request_duration,
        };

        let models = ModelMetrics {
            loads_total,
            load_failures_total,
            unloads_total,
            loaded,
            reconcile_duration,
        };

        Ok(MetricsRegistry {
            registry,
            requests,
            models,
        })
    }

    /// Gather all metrics in the Prometheus text format
    pub fn gather(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let metrics = MetricsRegistry::new().unwrap();

        // Record some metrics
        metrics.requests.predictions_total.inc();
        metrics.requests.examples_per_request.observe(3.0);
        metrics.models.loads_total.with_label_values(&["0"]).inc();
        metrics.models.loaded.with_label_values(&["0"]).set(2);

        // Gather metrics
        let output = metrics.gather().unwrap();
        assert!(output.contains("scored_predictions_total 1"));
        assert!(output.contains("scored_models_loaded{worker=\"0\"} 2"));
        assert!(output.contains("scored_examples_per_request"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = MetricsRegistry::new().unwrap();
        let b = MetricsRegistry::new().unwrap();

        a.requests.no_model.inc();

        assert_eq!(a.requests.no_model.get(), 1);
        assert_eq!(b.requests.no_model.get(), 0);
    }
}
