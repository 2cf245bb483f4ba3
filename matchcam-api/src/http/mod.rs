// Module: http
// REST endpoints for the UI and the audio detector, plus the camera stream proxy

pub mod error;
pub mod health;
pub mod matches;
pub mod recordings;
pub mod storage;
pub mod stream;

use axum::{
    routing::{delete, get, post},
    Router,
};
use matchcam_core::repository::{FingerprintStore, ThresholdStore};
use matchcam_livestream::StreamManager;
use matchcam_recorder::MatchOrchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub streams: Arc<StreamManager>,
    pub orchestrator: Arc<MatchOrchestrator>,
    pub threshold: Arc<ThresholdStore>,
    pub fingerprints: Arc<FingerprintStore>,
    /// Where finished match videos are listed from
    pub recordings_dir: PathBuf,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        // Live camera proxy
        .route("/stream", get(stream::proxy_stream))
        .route("/api/streams", get(stream::list_streams))
        .route(
            "/api/streams/{camera}/disconnect",
            post(stream::disconnect_stream),
        )
        // Match flow
        .route("/api/cameras", get(matches::list_cameras))
        .route("/api/match-state", get(matches::match_state))
        .route("/api/match-event", post(matches::match_event))
        .route(
            "/api/recordings/{camera}/start",
            post(matches::start_recording),
        )
        .route("/api/recordings/{camera}/stop", post(matches::stop_recording))
        // Finished recordings
        .route("/api/recordings", get(recordings::list_recordings))
        .route("/api/video-info/{file}", get(recordings::video_info))
        // Detector settings
        .route(
            "/api/threshold",
            get(storage::get_threshold).post(storage::set_threshold),
        )
        .route(
            "/api/fingerprints",
            get(storage::list_fingerprints).post(storage::add_fingerprint),
        )
        .route(
            "/api/fingerprints/{name}",
            delete(storage::delete_fingerprint),
        )
        .merge(health::create_health_router());

    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
