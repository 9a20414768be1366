//! HTTP transport
//!
//! | Route      | Answer                                        |
//! |------------|-----------------------------------------------|
//! | `/ping`    | `pong`                                        |
//! | `/models`  | JSON list of `{name, last_modified}`          |
//! | `/p?m=...` | JSON array of scores for a JSON array of examples |
//! | `/metrics` | Prometheus text format                        |

use crate::pool::WorkerPool;
use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use scored_common::{MetricsRegistry, RequestMetrics, ScoredError};
use scored_proto::{ErrorBody, Example, PredictQuery};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Shared state of every request handler
pub struct AppState {
    pub pool: WorkerPool,
    pub metrics: MetricsRegistry,
}

/// Error response wrapper
#[derive(Debug)]
pub struct ApiError(pub ScoredError);

impl From<ScoredError> for ApiError {
    fn from(err: ScoredError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ScoredError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ScoredError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/models", get(models))
        .route("/metrics", get(metrics))
        .route("/p", any(predict))
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn models(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    json_ok(&state.metrics.requests, &state.pool.active_models())
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    Ok(state.metrics.gather()?)
}

async fn predict(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PredictQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let requests = &state.metrics.requests;
    let _timer = requests.request_duration.start_timer();

    let Query(query) = query.map_err(|e| {
        requests.no_model.inc();
        warn!("predict: bad query: {}", e);
        ScoredError::malformed(format!("bad query: {}", e))
    })?;

    let Some(model) = query.model() else {
        requests.no_model.inc();
        warn!("predict: no model specified");
        return Err(ScoredError::malformed("no model specified").into());
    };

    let body = body.map_err(|e| {
        requests.read_errors.inc();
        warn!("predict: unreadable body: {}", e);
        ScoredError::malformed(format!("unreadable body: {}", e))
    })?;

    let examples: Vec<Example> = serde_json::from_slice(&body).map_err(|e| {
        requests.json_errors.inc();
        warn!("predict: bad body: {}", e);
        ScoredError::malformed(format!("body must be a JSON array of strings: {}", e))
    })?;

    requests.examples_per_request.observe(examples.len() as f64);

    let scores = state.pool.predict(model, examples).await.map_err(|e| {
        requests.prediction_errors.inc();
        warn!("predict {}: {}", model, e);
        e
    })?;

    requests.predictions_total.inc();
    json_ok(requests, &scores)
}

fn json_ok<T: Serialize>(requests: &RequestMetrics, value: &T) -> Result<Response, ApiError> {
    let body = serde_json::to_vec(value).map_err(|e| {
        requests.json_errors.inc();
        ScoredError::from(e)
    })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json; charset=UTF-8")],
        body,
    )
        .into_response())
}
