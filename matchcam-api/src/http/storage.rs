// Detector settings: match-sound threshold and audio fingerprints

use axum::{
    extract::{Path, State},
    Json,
};
use matchcam_core::models::{Fingerprint, NewFingerprint};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::http::{AppResult, AppState};

/// GET /api/threshold
pub async fn get_threshold(State(state): State<AppState>) -> Json<Value> {
    Json(state.threshold.get().await)
}

/// POST /api/threshold - stores the body as-is
pub async fn set_threshold(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> AppResult<Json<Value>> {
    state.threshold.set(&body).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/fingerprints
pub async fn list_fingerprints(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, Fingerprint>> {
    Json(state.fingerprints.list().await)
}

/// POST /api/fingerprints
pub async fn add_fingerprint(
    State(state): State<AppState>,
    Json(new): Json<NewFingerprint>,
) -> AppResult<Json<Value>> {
    let name = new.name.clone();
    state.fingerprints.insert(new).await?;
    Ok(Json(json!({ "success": true, "name": name })))
}

/// DELETE /api/fingerprints/{name}
pub async fn delete_fingerprint(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    state.fingerprints.remove(&name).await?;
    Ok(Json(json!({ "success": true, "deleted": name })))
}
