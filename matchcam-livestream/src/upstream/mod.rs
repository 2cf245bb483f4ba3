//! Upstream camera connections
//!
//! A connector turns a camera URL into an ordered stream of [`UpstreamEvent`]s:
//! exactly one `Headers` first (unless the attempt fails outright), then any
//! number of `Data` chunks, then a single terminal `End` or `Error`.
//! The returned [`UpstreamHandle`] aborts the connection; abort is idempotent.

mod http_connector;
mod mock;

pub use http_connector::HttpUpstreamConnector;
pub use mock::{MockUpstream, MockUpstreamConnector};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum UpstreamEvent {
    Headers { status: StatusCode, headers: HeaderMap },
    Data(Bytes),
    End,
    Error(UpstreamError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("no response within {0:?}")]
    ConnectTimeout(Duration),

    #[error("no data within {0:?}")]
    ReadTimeout(Duration),

    #[error("{0}")]
    Network(String),
}

impl UpstreamError {
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout(_) | Self::ReadTimeout(_))
    }
}

/// Abort switch for one upstream connection
#[derive(Debug, Clone, Default)]
pub struct UpstreamHandle {
    token: CancellationToken,
}

impl UpstreamHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the connection. Safe to call any number of times.
    pub fn abort(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`abort`](Self::abort) has been called.
    pub async fn aborted(&self) {
        self.token.cancelled().await;
    }
}

/// Opens upstream connections to cameras
///
/// `connect` must be called from within a Tokio runtime; implementations
/// drive the connection on a spawned task and report through the channel.
pub trait UpstreamConnector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> (UpstreamHandle, mpsc::Receiver<UpstreamEvent>);
}
