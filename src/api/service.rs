use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::utils::Metrics;

/// GET / - Liveness message
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "PG to PG ETL Service" }))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// GET /metrics - Prometheus text format
pub async fn metrics(State(metrics): State<Arc<Metrics>>) -> (StatusCode, String) {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Router for liveness, health and metrics
pub fn service_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(self::metrics))
        .with_state(metrics)
}
