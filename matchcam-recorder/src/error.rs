use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    #[error("Camera {0} is already recording")]
    AlreadyRecording(String),

    #[error("Failed to start encoder for camera {camera}: {source}")]
    ProcessSpawnFailure {
        camera: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Camera {0} is not recording")]
    NotRecording(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] matchcam_core::Error),
}

pub type RecorderResult<T> = Result<T, RecorderError>;
