//! HTTP handlers for the health server

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl HealthResponse {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Liveness: the process is up and serving
#[instrument]
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse::new("healthy"))
}

/// Readiness: caches synced and the dispatcher is running
#[instrument(skip_all)]
pub async fn readyz(State(ready): State<Arc<AtomicBool>>) -> (StatusCode, Json<HealthResponse>) {
    if ready.load(Ordering::SeqCst) {
        (StatusCode::OK, Json(HealthResponse::new("ready")))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::new("not ready")),
        )
    }
}

/// Prometheus text exposition of the controller registry
#[cfg(feature = "metrics")]
pub async fn metrics() -> (StatusCode, String) {
    use prometheus_client::encoding::text::encode;

    let mut buffer = String::new();
    match encode(&mut buffer, &crate::controller::metrics::REGISTRY) {
        Ok(()) => (StatusCode::OK, buffer),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
