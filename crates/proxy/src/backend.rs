//! Backend service.
//!
//! `GET /api/process` performs the per-user work once per user for the life
//! of the process. Concurrent first requests for one user share a single
//! computation through [`SingleFlightCache`].
//!
//! Every call is timed into the `api.request.duration` histogram, labelled
//! with the serving instance's id.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use corelib::{InstanceId, SingleFlightCache};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProxyError;
use crate::user_key;

const REQUEST_DURATION: &str = "api.request.duration";

/// Outcome of the per-user computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserResult {
    pub user_id: String,
    pub processing_time_ms: u64,
}

/// Simulated per-user work behind a single-flight cache.
#[derive(Debug)]
pub struct ProcessingService {
    cache: SingleFlightCache<Arc<UserResult>, Infallible>,
    processing_time: Duration,
}

impl ProcessingService {
    pub fn new(processing_time: Duration) -> Self {
        Self {
            cache: SingleFlightCache::new(),
            processing_time,
        }
    }

    /// Result for `user_id`, computing it only if no earlier request did.
    pub async fn process(&self, user_id: &str) -> Arc<UserResult> {
        let processing_time = self.processing_time;
        let id = user_id.to_owned();
        let result = self
            .cache
            .get_or_compute(user_id, move || async move {
                tracing::info!(
                    user_id = %id,
                    processing_ms = processing_time.as_millis() as u64,
                    "First request for user, processing"
                );
                tokio::time::sleep(processing_time).await;
                Ok(Arc::new(UserResult {
                    user_id: id,
                    processing_time_ms: processing_time.as_millis() as u64,
                }))
            })
            .await;

        match result {
            Ok(result) => result,
            Err(never) => match never {},
        }
    }

    /// Number of users processed or in progress.
    pub fn cached_users(&self) -> usize {
        self.cache.len()
    }
}

#[derive(Clone)]
pub struct BackendState {
    pub processing: Arc<ProcessingService>,
    pub instance_id: InstanceId,
}

/// Body of a successful `GET /api/process`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub user_id: String,
    /// Wall time this request waited for its result.
    pub processing_time_ms: u64,
    pub correlation_id: String,
    pub instance_id: u64,
}

pub fn backend_app(state: BackendState) -> Router {
    Router::new()
        .route("/api/process", get(process))
        .route("/health", get(health))
        .with_state(state)
}

async fn process(State(state): State<BackendState>, headers: HeaderMap) -> Response {
    let Some(user_id) = user_key(&headers) else {
        return ProxyError::MissingKey.into_response();
    };

    let start = Instant::now();
    let result = state.processing.process(user_id).await;
    let elapsed = start.elapsed();
    record_request_duration(state.instance_id, elapsed);

    Json(ProcessResponse {
        user_id: result.user_id.clone(),
        processing_time_ms: elapsed.as_millis() as u64,
        correlation_id: Uuid::new_v4().to_string(),
        instance_id: state.instance_id.0,
    })
    .into_response()
}

/// Seconds, matching the Prometheus base unit.
fn record_request_duration(instance_id: InstanceId, elapsed: Duration) {
    metrics::histogram!(REQUEST_DURATION, "instance_id" => instance_id.to_string())
        .record(elapsed.as_secs_f64());
}

async fn health() -> StatusCode {
    StatusCode::OK
}
