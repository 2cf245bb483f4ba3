use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::sink::{ClientId, ClientSink};
use crate::error::StreamError;
use crate::upstream::{UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamHandle};

const DEFAULT_CONTENT_TYPE: &str = "video/x-flv";

pub(crate) type StreamRegistry = DashMap<String, Arc<CameraStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    Idle,
    Connecting,
    Connected,
    Error,
}

/// Fan-out tuning shared by every camera
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Zero tears the upstream down as soon as the last client leaves
    pub idle_grace: Duration,
    pub client_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            idle_grace: Duration::ZERO,
            client_buffer: 256,
        }
    }
}

impl From<&matchcam_core::config::StreamingConfig> for StreamSettings {
    fn from(config: &matchcam_core::config::StreamingConfig) -> Self {
        Self {
            idle_grace: config.idle_grace(),
            client_buffer: config.client_buffer_chunks,
        }
    }
}

/// Everything a CameraStream needs from its manager
pub(crate) struct StreamContext {
    pub(crate) connector: Arc<dyn UpstreamConnector>,
    pub(crate) settings: StreamSettings,
    pub(crate) registry: Weak<StreamRegistry>,
    pub(crate) upstream_connects: AtomicU64,
}

pub(crate) enum SubscribeError {
    /// Instance already torn down; the sink is handed back for a retry
    Retired(ClientSink),
    Rejected(StreamError),
}

struct Inner {
    state: StreamState,
    clients: HashMap<ClientId, ClientSink>,
    upstream: Option<UpstreamHandle>,
    response_headers: Option<HeaderMap>,
    idle_timer: Option<JoinHandle<()>>,
    last_error: Option<StreamError>,
    /// Set once the instance has left the registry; nothing is accepted after
    retired: bool,
}

/// One camera's upstream connection and the clients sharing it.
///
/// An instance goes IDLE -> CONNECTING -> CONNECTED and is retired when the
/// upstream ends, fails, or has no clients left. A retired instance is never
/// reused: the registry entry is dropped (or replaced by a fresh IDLE one
/// after an error) before the lock is released.
pub(crate) struct CameraStream {
    key: String,
    url: String,
    ctx: Arc<StreamContext>,
    inner: Mutex<Inner>,
}

impl CameraStream {
    pub(crate) fn new(key: String, url: String, ctx: Arc<StreamContext>) -> Self {
        Self {
            key,
            url,
            ctx,
            inner: Mutex::new(Inner {
                state: StreamState::Idle,
                clients: HashMap::new(),
                upstream: None,
                response_headers: None,
                idle_timer: None,
                last_error: None,
                retired: false,
            }),
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    pub(crate) fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub(crate) fn subscribe(
        self: &Arc<Self>,
        client_id: ClientId,
        mut sink: ClientSink,
    ) -> Result<(), SubscribeError> {
        let mut inner = self.inner.lock();

        if inner.retired {
            if inner.state == StreamState::Error {
                let error = inner.last_error.clone().unwrap_or_else(|| {
                    StreamError::UpstreamConnectFailure("camera unavailable".to_string())
                });
                return Err(SubscribeError::Rejected(error));
            }
            return Err(SubscribeError::Retired(sink));
        }

        if let Some(timer) = inner.idle_timer.take() {
            timer.abort();
            debug!(camera = %self.key, "Client returned within grace period, keeping upstream");
        }

        match inner.state {
            StreamState::Idle => {
                inner.clients.insert(client_id, sink);
                self.start_upstream(&mut inner);
            }
            StreamState::Connecting => {
                inner.clients.insert(client_id, sink);
            }
            StreamState::Connected => {
                let headers = inner.response_headers.clone().unwrap_or_default();
                if sink.send_headers(&headers) {
                    inner.clients.insert(client_id, sink);
                } else {
                    // Client vanished before we got to it
                    self.schedule_idle_cleanup(&mut inner);
                    return Ok(());
                }
            }
            StreamState::Error => {
                // Error instances are always retired, handled above
                return Err(SubscribeError::Rejected(StreamError::UpstreamConnectFailure(
                    "camera unavailable".to_string(),
                )));
            }
        }

        info!(
            camera = %self.key,
            client_id,
            state = ?inner.state,
            clients = inner.clients.len(),
            "Client connected"
        );
        Ok(())
    }

    pub(crate) fn unsubscribe(self: &Arc<Self>, client_id: ClientId) {
        let mut inner = self.inner.lock();
        if inner.clients.remove(&client_id).is_some() {
            info!(
                camera = %self.key,
                client_id,
                remaining = inner.clients.len(),
                "Client disconnected"
            );
            self.schedule_idle_cleanup(&mut inner);
        }
    }

    /// Tear down regardless of clients. Returns false if already retired.
    pub(crate) fn shutdown(self: &Arc<Self>) -> bool {
        let mut inner = self.inner.lock();
        if inner.retired {
            return false;
        }
        info!(camera = %self.key, clients = inner.clients.len(), "Disconnecting camera stream");
        self.retire(&mut inner, &StreamError::Disconnected, StreamState::Idle, false);
        true
    }

    fn start_upstream(self: &Arc<Self>, inner: &mut Inner) {
        inner.state = StreamState::Connecting;
        self.ctx.upstream_connects.fetch_add(1, Ordering::Relaxed);
        info!(camera = %self.key, url = %self.url, "Opening upstream connection");

        let (handle, events) = self.ctx.connector.connect(&self.url);
        inner.upstream = Some(handle.clone());

        let stream = Arc::clone(self);
        let span = tracing::info_span!("camera_stream", camera = %self.key);
        tokio::spawn(stream.run_upstream(handle, events).instrument(span));
    }

    async fn run_upstream(
        self: Arc<Self>,
        handle: UpstreamHandle,
        mut events: mpsc::Receiver<UpstreamEvent>,
    ) {
        loop {
            let event = tokio::select! {
                () = handle.aborted() => break,
                event = events.recv() => event,
            };

            let keep_going = match event {
                Some(UpstreamEvent::Headers { status, headers }) => {
                    self.on_headers(status, &headers)
                }
                Some(UpstreamEvent::Data(chunk)) => self.on_data(&chunk),
                Some(UpstreamEvent::End) | None => {
                    self.on_end();
                    false
                }
                Some(UpstreamEvent::Error(e)) => {
                    self.on_error(&e);
                    false
                }
            };
            if !keep_going {
                break;
            }
        }
        debug!("Upstream pump finished");
    }

    fn on_headers(self: &Arc<Self>, status: StatusCode, headers: &HeaderMap) -> bool {
        let mut inner = self.inner.lock();
        if inner.retired {
            return false;
        }

        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "Camera answered with non-200 status");
            let error = StreamError::UpstreamConnectFailure(format!(
                "camera responded with status {}",
                status.as_u16()
            ));
            self.fail(&mut inner, error);
            return false;
        }

        let content_type = headers
            .get(CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        let mut response_headers = HeaderMap::new();
        response_headers.insert(CONTENT_TYPE, content_type);

        inner.state = StreamState::Connected;

        let mut gone = Vec::new();
        for (id, sink) in &mut inner.clients {
            if !sink.headers_sent() && !sink.send_headers(&response_headers) {
                gone.push(*id);
            }
        }
        for id in gone {
            inner.clients.remove(&id);
        }
        inner.response_headers = Some(response_headers);

        info!(clients = inner.clients.len(), "Connected to camera");
        self.schedule_idle_cleanup(&mut inner);
        !inner.retired
    }

    fn on_data(self: &Arc<Self>, chunk: &Bytes) -> bool {
        let mut inner = self.inner.lock();
        if inner.retired {
            return false;
        }

        let mut failed = Vec::new();
        for (id, sink) in &inner.clients {
            if !sink.offer(chunk) {
                failed.push(*id);
            }
        }

        if !failed.is_empty() {
            for id in failed {
                inner.clients.remove(&id);
                debug!(client_id = id, "Client not writable, dropping it");
            }
            self.schedule_idle_cleanup(&mut inner);
        }
        !inner.retired
    }

    fn on_end(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.retired {
            return;
        }

        if inner.state == StreamState::Connecting {
            self.fail(
                &mut inner,
                StreamError::UpstreamConnectFailure("camera closed the connection".to_string()),
            );
            return;
        }

        info!(clients = inner.clients.len(), "Camera ended the stream");
        self.retire(&mut inner, &StreamError::Disconnected, StreamState::Idle, false);
    }

    fn on_error(self: &Arc<Self>, upstream_error: &UpstreamError) {
        let mut inner = self.inner.lock();
        if inner.retired {
            return;
        }

        let error = match (inner.state, upstream_error) {
            (StreamState::Connected, e) => StreamError::UpstreamMidStreamFailure(e.to_string()),
            (_, e) if e.is_timeout() => StreamError::UpstreamTimeout(e.to_string()),
            (_, e) => StreamError::UpstreamConnectFailure(e.to_string()),
        };
        self.fail(&mut inner, error);
    }

    /// Move to ERROR, fail every client and hand the key to a fresh instance.
    fn fail(self: &Arc<Self>, inner: &mut Inner, error: StreamError) {
        error!(
            error = %error,
            clients = inner.clients.len(),
            "Camera stream failed, notifying clients"
        );
        inner.last_error = Some(error.clone());
        self.retire(inner, &error, StreamState::Error, true);
    }

    fn schedule_idle_cleanup(self: &Arc<Self>, inner: &mut Inner) {
        if inner.retired || !inner.clients.is_empty() {
            return;
        }

        let grace = self.ctx.settings.idle_grace;
        if grace.is_zero() {
            info!(camera = %self.key, "No clients left, closing upstream");
            self.retire(inner, &StreamError::Disconnected, StreamState::Idle, false);
            return;
        }
        if inner.idle_timer.is_some() {
            return;
        }

        debug!(camera = %self.key, ?grace, "No clients left, scheduling cleanup");
        let stream = Arc::clone(self);
        inner.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            stream.on_idle_timeout();
        }));
    }

    fn on_idle_timeout(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        // Running on the timer task itself, so just forget the handle
        inner.idle_timer = None;
        if inner.retired || !inner.clients.is_empty() {
            return;
        }
        info!(camera = %self.key, "Idle grace period over, closing upstream");
        self.retire(&mut inner, &StreamError::Disconnected, StreamState::Idle, false);
    }

    fn retire(
        self: &Arc<Self>,
        inner: &mut Inner,
        client_error: &StreamError,
        final_state: StreamState,
        replace: bool,
    ) {
        inner.retired = true;
        inner.state = final_state;
        inner.response_headers = None;

        if let Some(timer) = inner.idle_timer.take() {
            timer.abort();
        }
        if let Some(upstream) = inner.upstream.take() {
            upstream.abort();
        }
        for (_, sink) in inner.clients.drain() {
            sink.terminate(client_error.clone());
        }

        let Some(registry) = self.ctx.registry.upgrade() else {
            return;
        };
        if replace {
            if let Some(mut entry) = registry.get_mut(&self.key) {
                if Arc::ptr_eq(entry.value(), self) {
                    *entry = Arc::new(Self::new(
                        self.key.clone(),
                        self.url.clone(),
                        Arc::clone(&self.ctx),
                    ));
                }
            }
        } else {
            registry.remove_if(&self.key, |_, current| Arc::ptr_eq(current, self));
        }
        debug!(camera = %self.key, state = ?final_state, "Camera stream retired");
    }
}
