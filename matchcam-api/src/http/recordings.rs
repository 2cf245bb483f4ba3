// Finished match videos in the output directory

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;

use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct VideoInfo {
    pub size: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// GET /api/recordings - newest file names first
pub async fn list_recordings(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    let mut entries = match tokio::fs::read_dir(&state.recordings_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Json(Vec::new())),
        Err(e) => {
            tracing::error!("Could not list recordings: {}", e);
            return Err(AppError::internal("Could not list recordings"));
        }
    };

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|_| AppError::internal("Could not list recordings"))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".mp4") {
            files.push(name);
        }
    }
    // Names embed the match number and a sortable timestamp
    files.sort_unstable_by(|a, b| b.cmp(a));
    Ok(Json(files))
}

/// GET /api/video-info/{file}
pub async fn video_info(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> AppResult<Json<VideoInfo>> {
    if !is_plain_file_name(&file) {
        return Err(AppError::bad_request("Invalid file name"));
    }

    let metadata = tokio::fs::metadata(state.recordings_dir.join(&file))
        .await
        .map_err(|_| AppError::not_found("File not found"))?;
    if !metadata.is_file() {
        return Err(AppError::not_found("File not found"));
    }

    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::from)
        .unwrap_or_else(|_| Utc::now());
    // Not every filesystem records a birth time
    let created = metadata.created().map(DateTime::from).unwrap_or(modified);

    Ok(Json(VideoInfo {
        size: metadata.len(),
        created,
        modified,
    }))
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}
