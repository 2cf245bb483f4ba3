//! Health check endpoint for monitoring probes.

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::http::AppState;

pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
