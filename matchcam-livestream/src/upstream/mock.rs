use std::sync::Arc;

use bytes::Bytes;
use http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamHandle};

/// Scriptable connector for tests
///
/// Every `connect` call is recorded; tests drive the resulting connection
/// through the matching [`MockUpstream`].
#[derive(Clone, Default)]
pub struct MockUpstreamConnector {
    connections: Arc<Mutex<Vec<MockUpstream>>>,
}

/// Test side of one mocked upstream connection
#[derive(Clone)]
pub struct MockUpstream {
    pub url: String,
    events: mpsc::Sender<UpstreamEvent>,
    handle: UpstreamHandle,
}

impl MockUpstreamConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Connection number `index` (0-based, in connect order)
    #[must_use]
    pub fn connection(&self, index: usize) -> Option<MockUpstream> {
        self.connections.lock().get(index).cloned()
    }

    #[must_use]
    pub fn last(&self) -> Option<MockUpstream> {
        self.connections.lock().last().cloned()
    }
}

impl UpstreamConnector for MockUpstreamConnector {
    fn connect(&self, url: &str) -> (UpstreamHandle, mpsc::Receiver<UpstreamEvent>) {
        let handle = UpstreamHandle::new();
        let (tx, rx) = mpsc::channel(64);
        self.connections.lock().push(MockUpstream {
            url: url.to_string(),
            events: tx,
            handle: handle.clone(),
        });
        (handle, rx)
    }
}

impl MockUpstream {
    pub async fn respond(&self, status: u16, content_type: Option<&'static str>) {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let _ = self.events.send(UpstreamEvent::Headers { status, headers }).await;
    }

    pub async fn send(&self, chunk: &'static [u8]) {
        let _ = self
            .events
            .send(UpstreamEvent::Data(Bytes::from_static(chunk)))
            .await;
    }

    pub async fn end(&self) {
        let _ = self.events.send(UpstreamEvent::End).await;
    }

    pub async fn fail(&self, error: UpstreamError) {
        let _ = self.events.send(UpstreamEvent::Error(error)).await;
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.handle.is_aborted()
    }
}
