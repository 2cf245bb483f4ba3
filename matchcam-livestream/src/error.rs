use http::StatusCode;
use thiserror::Error;

/// Failures visible to a stream client.
///
/// Every variant is terminal for the request that observed it; a new request
/// always gets a fresh connection attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    #[error("Camera error: {0}")]
    UpstreamConnectFailure(String),

    #[error("Camera timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Camera stream failed: {0}")]
    UpstreamMidStreamFailure(String),

    #[error("Stream disconnected by server.")]
    Disconnected,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// HTTP status sent to a client that has not received headers yet
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::CameraNotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamConnectFailure(_) | Self::UpstreamMidStreamFailure(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Disconnected => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
