//! Camera stream proxy and stream inspection
//!
//! `/stream` answers with the upstream's content type and a chunked body, or
//! with a short plain-text error (404/502/503/504) when the camera is unknown
//! or unavailable.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use matchcam_livestream::{StreamError, StreamInfo};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::http::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub camera: Option<String>,
}

/// GET /stream?camera=<key>
pub async fn proxy_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let camera = query.camera.unwrap_or_default();

    let subscription = match state.streams.proxy_stream(&camera) {
        Ok(subscription) => subscription,
        Err(e) => return stream_error(&e),
    };
    let client_id = subscription.client_id();
    debug!(camera = %camera, client_id, "Waiting for camera response");

    match subscription.wait_ready().await {
        Ok(ready) => {
            let mut response = Response::new(Body::from_stream(ready.body));
            *response.headers_mut() = ready.headers;
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
            response
        }
        Err(e) => stream_error(&e),
    }
}

fn stream_error(error: &StreamError) -> Response {
    let message = match error {
        StreamError::CameraNotFound(_) => "Camera not found".to_string(),
        other => other.to_string(),
    };
    (error.status_code(), message).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamsResponse {
    pub streams: Vec<StreamInfo>,
    pub upstream_connects: u64,
}

/// GET /api/streams
pub async fn list_streams(State(state): State<AppState>) -> Json<StreamsResponse> {
    Json(StreamsResponse {
        streams: state.streams.snapshot(),
        upstream_connects: state.streams.connect_count(),
    })
}

/// POST /api/streams/{camera}/disconnect
pub async fn disconnect_stream(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> Json<serde_json::Value> {
    let disconnected = state.streams.disconnect(&camera);
    info!(camera = %camera, disconnected, "Operator disconnect");
    Json(serde_json::json!({ "disconnected": disconnected }))
}
