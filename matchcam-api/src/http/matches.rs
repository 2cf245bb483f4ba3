// Match flow endpoints: event trigger, state query and manual recording control

use axum::{
    extract::{Path, State},
    Json,
};
use matchcam_core::models::{CameraMap, MatchEvent};
use matchcam_recorder::{MatchEventOutcome, MatchSnapshot, RecordingInfo};
use serde::Serialize;
use tracing::info;

use crate::http::{AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct MatchEventResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: MatchEventOutcome,
}

#[derive(Debug, Serialize)]
pub struct RecordingResponse {
    pub success: bool,
    pub recording: RecordingInfo,
}

/// GET /api/cameras
pub async fn list_cameras(State(state): State<AppState>) -> Json<CameraMap> {
    Json(state.streams.cameras().clone())
}

/// GET /api/match-state
pub async fn match_state(State(state): State<AppState>) -> Json<MatchSnapshot> {
    Json(state.orchestrator.snapshot().await)
}

/// POST /api/match-event
///
/// A start while a match is already recording is reported with
/// `accepted: false` and leaves everything untouched.
pub async fn match_event(
    State(state): State<AppState>,
    Json(event): Json<MatchEvent>,
) -> Json<MatchEventResponse> {
    let outcome = state.orchestrator.handle_event(event).await;
    Json(MatchEventResponse {
        success: true,
        outcome,
    })
}

/// POST /api/recordings/{camera}/start
pub async fn start_recording(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> AppResult<Json<RecordingResponse>> {
    let recording = state.orchestrator.start_recording(&camera).await?;
    info!(camera = %camera, file = %recording.file_name, "Manual recording started");
    Ok(Json(RecordingResponse {
        success: true,
        recording,
    }))
}

/// POST /api/recordings/{camera}/stop
pub async fn stop_recording(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    state.orchestrator.stop_recording(&camera)?;
    Ok(Json(serde_json::json!({ "success": true, "camera": camera })))
}

#[cfg(test)]
mod tests {
    use crate::http::test_support::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_list_cameras() {
        let app = test_app().await;
        let cameras = body_json(app.get("/api/cameras").await).await;
        assert_eq!(cameras["field1"]["host"], "10.0.0.5");
        assert_eq!(cameras["field1"]["port"], 8080);
    }

    #[tokio::test]
    async fn test_initial_match_state() {
        let app = test_app().await;
        let state = body_json(app.get("/api/match-state").await).await;
        assert_eq!(state["currentMatchNumber"], 1);
        assert_eq!(state["matchType"], "match");
        assert_eq!(state["gameState"], "WAITING");
        assert_eq!(state["isRecording"], false);
        assert!(state["matchEndedBy"].is_null());
    }

    #[tokio::test]
    async fn test_abort_while_waiting() {
        let app = test_app().await;
        let response = app
            .post_json(
                "/api/match-event",
                r#"{"eventType":"MATCH_ABORT","isManual":true}"#,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["gameState"], "WAITING");
        assert_eq!(body["currentMatchNumber"], 1);
        assert_eq!(body["matchEndedBy"], "manual");
    }

    #[tokio::test]
    async fn test_malformed_event_rejected() {
        let app = test_app().await;
        let response = app
            .post_json("/api/match-event", r#"{"eventType":"KICKOFF"}"#)
            .await;
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_stop_without_recording_is_404() {
        let app = test_app().await;
        let response = app.post_json("/api/recordings/field1/stop", "{}").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn test_start_recording_unknown_camera() {
        let app = test_app().await;
        let response = app.post_json("/api/recordings/backstage/start", "{}").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_match_start_then_duplicate() {
        let app = test_app().await;

        let body = body_json(
            app.post_json(
                "/api/match-event",
                r#"{"eventType":"MATCH_START","matchNumber":12,"isManual":false}"#,
            )
            .await,
        )
        .await;
        assert_eq!(body["accepted"], true);
        assert_eq!(body["gameState"], "RECORDING");
        assert_eq!(body["currentMatchNumber"], 12);

        let body = body_json(
            app.post_json(
                "/api/match-event",
                r#"{"eventType":"MATCH_START","matchNumber":13,"isManual":false}"#,
            )
            .await,
        )
        .await;
        assert_eq!(body["accepted"], false);
        assert_eq!(body["currentMatchNumber"], 12);

        let state = body_json(app.get("/api/match-state").await).await;
        assert_eq!(state["isRecording"], true);
        assert_eq!(state["startedBy"], "automated");
        assert_eq!(state["activeRecordings"].as_array().map(Vec::len), Some(1));

        let body = body_json(
            app.post_json(
                "/api/match-event",
                r#"{"eventType":"MATCH_ABORT","isManual":true}"#,
            )
            .await,
        )
        .await;
        assert_eq!(body["currentMatchNumber"], 13);
        assert!(
            app.state
                .orchestrator
                .recordings()
                .wait_idle(std::time::Duration::from_secs(10))
                .await
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_manual_recording_conflict() {
        let app = test_app().await;

        let response = app.post_json("/api/recordings/field1/start", "{}").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["recording"]["fileName"]
            .as_str()
            .unwrap()
            .starts_with("match1_field1_"));

        let response = app.post_json("/api/recordings/field1/start", "{}").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app.post_json("/api/recordings/field1/stop", "{}").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            app.state
                .orchestrator
                .recordings()
                .wait_idle(std::time::Duration::from_secs(10))
                .await
        );
    }
}
