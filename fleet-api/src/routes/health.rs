//! Trivial liveness probe, grounded on `hr-api/src/routes/health.rs`.

use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::json;

use crate::state::ApiState;

pub fn router() -> Router<ApiState> {
    Router::new().route("/healthz", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
