use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use matchcam_core::models::CameraMap;
use serde::Serialize;
use tracing::{info, warn};

use super::camera_stream::{
    CameraStream, StreamContext, StreamRegistry, StreamSettings, StreamState, SubscribeError,
};
use super::sink::{ClientSink, SubscriptionGuard};
use super::Subscription;
use crate::error::StreamError;
use crate::upstream::UpstreamConnector;

/// Point-in-time view of one active camera stream
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub camera: String,
    pub state: StreamState,
    pub clients: usize,
}

/// Camera key -> stream registry and entry point for proxy requests.
///
/// Entries are created lazily on the first request for a configured camera
/// and disappear again when their stream is torn down.
pub struct StreamManager {
    cameras: Arc<CameraMap>,
    streams: Arc<StreamRegistry>,
    ctx: Arc<StreamContext>,
    next_client_id: AtomicU64,
}

impl StreamManager {
    pub fn new(
        cameras: Arc<CameraMap>,
        connector: Arc<dyn UpstreamConnector>,
        settings: StreamSettings,
    ) -> Self {
        let streams = Arc::new(StreamRegistry::new());
        let ctx = Arc::new(StreamContext {
            connector,
            settings,
            registry: Arc::downgrade(&streams),
            upstream_connects: AtomicU64::new(0),
        });

        Self {
            cameras,
            streams,
            ctx,
            next_client_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn cameras(&self) -> &CameraMap {
        &self.cameras
    }

    /// Attach a new client to `camera_key`, opening the upstream if needed.
    ///
    /// Unknown keys fail immediately without touching the registry. The
    /// returned subscription resolves once the camera has answered.
    pub fn proxy_stream(&self, camera_key: &str) -> Result<Subscription, StreamError> {
        let Some(camera) = self.cameras.get(camera_key) else {
            warn!(camera = %camera_key, "Stream requested for unknown camera");
            return Err(StreamError::CameraNotFound(camera_key.to_string()));
        };

        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (mut sink, receiver) = ClientSink::channel(self.ctx.settings.client_buffer);

        loop {
            let stream = Arc::clone(
                self.streams
                    .entry(camera_key.to_string())
                    .or_insert_with(|| {
                        Arc::new(CameraStream::new(
                            camera_key.to_string(),
                            camera.stream_url(),
                            Arc::clone(&self.ctx),
                        ))
                    })
                    .value(),
            );

            match stream.subscribe(client_id, sink) {
                Ok(()) => {
                    let guard = SubscriptionGuard::new(stream, client_id);
                    return Ok(Subscription::new(camera_key.to_string(), receiver, guard));
                }
                // The instance left the registry between lookup and subscribe
                Err(SubscribeError::Retired(returned)) => sink = returned,
                Err(SubscribeError::Rejected(error)) => return Err(error),
            }
        }
    }

    /// Operator-initiated teardown of one camera stream.
    ///
    /// Clients receive 503 (or an aborted body). Returns false if the camera
    /// had no active stream.
    pub fn disconnect(&self, camera_key: &str) -> bool {
        // Clone out of the map before locking the stream
        let stream = self.streams.get(camera_key).map(|entry| Arc::clone(entry.value()));
        stream.is_some_and(|stream| stream.shutdown())
    }

    #[must_use]
    pub fn state_of(&self, camera_key: &str) -> Option<StreamState> {
        let stream = self.streams.get(camera_key).map(|entry| Arc::clone(entry.value()));
        stream.map(|stream| stream.state())
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<StreamInfo> {
        let streams: Vec<(String, Arc<CameraStream>)> = self
            .streams
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut infos: Vec<StreamInfo> = streams
            .into_iter()
            .map(|(camera, stream)| StreamInfo {
                camera,
                state: stream.state(),
                clients: stream.client_count(),
            })
            .collect();
        infos.sort_by(|a, b| a.camera.cmp(&b.camera));
        infos
    }

    /// Upstream connection attempts since startup
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.ctx.upstream_connects.load(Ordering::Relaxed)
    }

    /// Tear down every stream (process shutdown).
    pub fn shutdown(&self) {
        let streams: Vec<Arc<CameraStream>> = self
            .streams
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut closed = 0usize;
        for stream in streams {
            if stream.shutdown() {
                closed += 1;
            }
        }
        self.streams.clear();
        info!(closed, "Camera streams shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{HttpUpstreamConnector, MockUpstreamConnector, UpstreamError};
    use bytes::Bytes;
    use futures::StreamExt;
    use http::StatusCode;
    use matchcam_core::config::StreamingConfig;
    use matchcam_core::models::CameraConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cameras(host: &str, port: u16) -> Arc<CameraMap> {
        let mut cameras = CameraMap::new();
        cameras.insert(
            "field1".to_string(),
            CameraConfig {
                display_name: "Field 1".to_string(),
                host: host.to_string(),
                port,
                url_path: "/video".to_string(),
            },
        );
        Arc::new(cameras)
    }

    fn mock_manager(settings: StreamSettings) -> (StreamManager, MockUpstreamConnector) {
        let connector = MockUpstreamConnector::new();
        let manager = StreamManager::new(
            cameras("10.0.0.5", 8080),
            Arc::new(connector.clone()),
            settings,
        );
        (manager, connector)
    }

    fn http_manager(cameras: Arc<CameraMap>, connect_timeout_secs: u64) -> StreamManager {
        let config = StreamingConfig {
            connect_timeout_secs,
            ..StreamingConfig::default()
        };
        let connector = HttpUpstreamConnector::new(&config).unwrap();
        StreamManager::new(cameras, Arc::new(connector), StreamSettings::from(&config))
    }

    async fn next_chunk(body: &mut crate::ClientBody) -> Bytes {
        body.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_unknown_camera_creates_nothing() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let err = manager.proxy_stream("nope").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(manager.state_of("nope").is_none());
        assert!(manager.snapshot().is_empty());
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_clients_share_one_upstream() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let a = manager.proxy_stream("field1").unwrap();
        let b = manager.proxy_stream("field1").unwrap();
        let c = manager.proxy_stream("field1").unwrap();
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(manager.state_of("field1"), Some(StreamState::Connecting));

        let upstream = connector.last().unwrap();
        assert_eq!(upstream.url, "http://10.0.0.5:8080/video");
        upstream.respond(200, Some("video/x-flv")).await;

        let mut ready = Vec::new();
        for sub in [a, b, c] {
            let stream = sub.wait_ready().await.unwrap();
            assert_eq!(stream.headers[http::header::CONTENT_TYPE], "video/x-flv");
            ready.push(stream);
        }

        upstream.send(b"chunk-1").await;
        upstream.send(b"chunk-2").await;
        for stream in &mut ready {
            assert_eq!(next_chunk(&mut stream.body).await, Bytes::from_static(b"chunk-1"));
            assert_eq!(next_chunk(&mut stream.body).await, Bytes::from_static(b"chunk-2"));
        }

        // Late joiner gets headers right away, no second connection
        let late = manager.proxy_stream("field1").unwrap().wait_ready().await.unwrap();
        assert_eq!(late.headers[http::header::CONTENT_TYPE], "video/x-flv");
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(manager.connect_count(), 1);
        assert_eq!(manager.snapshot()[0].clients, 4);
    }

    #[tokio::test]
    async fn test_missing_content_type_defaults_to_flv() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let sub = manager.proxy_stream("field1").unwrap();
        connector.last().unwrap().respond(200, None).await;
        let stream = sub.wait_ready().await.unwrap();
        assert_eq!(stream.headers[http::header::CONTENT_TYPE], "video/x-flv");
    }

    #[tokio::test]
    async fn test_slow_client_is_dropped_without_affecting_others() {
        let settings = StreamSettings {
            client_buffer: 2,
            ..StreamSettings::default()
        };
        let (manager, connector) = mock_manager(settings);

        let a = manager.proxy_stream("field1").unwrap();
        let b = manager.proxy_stream("field1").unwrap();
        let slow = manager.proxy_stream("field1").unwrap();
        let upstream = connector.last().unwrap();
        upstream.respond(200, Some("video/x-flv")).await;

        let mut a = a.wait_ready().await.unwrap();
        let mut b = b.wait_ready().await.unwrap();
        let mut slow = slow.wait_ready().await.unwrap();

        for chunk in [b"one".as_slice(), b"two".as_slice(), b"three".as_slice()] {
            upstream.send(chunk).await;
            assert_eq!(next_chunk(&mut a.body).await, chunk);
            assert_eq!(next_chunk(&mut b.body).await, chunk);
        }

        // The slow client got what fit into its buffer, then its body ended
        assert_eq!(next_chunk(&mut slow.body).await, &b"one"[..]);
        assert_eq!(next_chunk(&mut slow.body).await, &b"two"[..]);
        assert!(slow.body.next().await.is_none());

        assert!(!upstream.is_aborted());
        assert_eq!(manager.snapshot()[0].clients, 2);
    }

    #[tokio::test]
    async fn test_last_client_leaving_closes_upstream() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let a = manager.proxy_stream("field1").unwrap();
        let b = manager.proxy_stream("field1").unwrap();
        let upstream = connector.last().unwrap();
        upstream.respond(200, Some("video/x-flv")).await;
        let a = a.wait_ready().await.unwrap();
        let b = b.wait_ready().await.unwrap();

        drop(a);
        assert!(!upstream.is_aborted());
        assert_eq!(manager.state_of("field1"), Some(StreamState::Connected));

        drop(b);
        assert!(upstream.is_aborted());
        assert!(manager.state_of("field1").is_none());

        // Next request starts over with a fresh connection
        let _c = manager.proxy_stream("field1").unwrap();
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_client_leaving_while_connecting_aborts_attempt() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let sub = manager.proxy_stream("field1").unwrap();
        drop(sub);
        assert!(connector.last().unwrap().is_aborted());
        assert!(manager.state_of("field1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_grace_period() {
        let settings = StreamSettings {
            idle_grace: Duration::from_secs(5),
            ..StreamSettings::default()
        };
        let (manager, connector) = mock_manager(settings);

        let sub = manager.proxy_stream("field1").unwrap();
        let upstream = connector.last().unwrap();
        upstream.respond(200, Some("video/x-flv")).await;
        drop(sub.wait_ready().await.unwrap());

        // Rejoin inside the grace window keeps the same upstream
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!upstream.is_aborted());
        let again = manager.proxy_stream("field1").unwrap().wait_ready().await.unwrap();
        assert_eq!(connector.connect_count(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!upstream.is_aborted());

        drop(again);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(upstream.is_aborted());
        assert!(manager.state_of("field1").is_none());
    }

    #[tokio::test]
    async fn test_non_200_fails_waiting_clients() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let a = manager.proxy_stream("field1").unwrap();
        let b = manager.proxy_stream("field1").unwrap();
        connector.last().unwrap().respond(500, None).await;

        for sub in [a, b] {
            let err = sub.wait_ready().await.unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
            assert!(err.to_string().contains("500"));
        }

        // Replaced with a fresh instance, so the next request reconnects
        assert_eq!(manager.state_of("field1"), Some(StreamState::Idle));
        let _retry = manager.proxy_stream("field1").unwrap();
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_timeout_maps_to_504() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let sub = manager.proxy_stream("field1").unwrap();
        connector
            .last()
            .unwrap()
            .fail(UpstreamError::ConnectTimeout(Duration::from_secs(15)))
            .await;

        let err = sub.wait_ready().await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_aborts_bodies() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let sub = manager.proxy_stream("field1").unwrap();
        let upstream = connector.last().unwrap();
        upstream.respond(200, Some("video/x-flv")).await;
        let mut stream = sub.wait_ready().await.unwrap();

        upstream.send(b"frame").await;
        assert_eq!(next_chunk(&mut stream.body).await, &b"frame"[..]);

        upstream.fail(UpstreamError::Network("connection reset".into())).await;
        assert!(stream.body.next().await.unwrap().is_err());
        assert!(upstream.is_aborted());
        assert_eq!(manager.state_of("field1"), Some(StreamState::Idle));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_reaches_client_with_full_buffer() {
        let settings = StreamSettings {
            client_buffer: 2,
            ..StreamSettings::default()
        };
        let (manager, connector) = mock_manager(settings);

        let sub = manager.proxy_stream("field1").unwrap();
        let upstream = connector.last().unwrap();
        upstream.respond(200, Some("video/x-flv")).await;
        let mut stream = sub.wait_ready().await.unwrap();

        // Client reads nothing until the upstream has failed
        upstream.send(b"one").await;
        upstream.send(b"two").await;
        upstream.fail(UpstreamError::Network("connection reset".into())).await;
        while manager.state_of("field1") != Some(StreamState::Idle) {
            tokio::task::yield_now().await;
        }
        assert!(upstream.is_aborted());

        assert_eq!(next_chunk(&mut stream.body).await, &b"one"[..]);
        assert_eq!(next_chunk(&mut stream.body).await, &b"two"[..]);
        assert!(stream.body.next().await.unwrap().is_err());
        assert!(stream.body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_upstream_end_terminates_clients() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let sub = manager.proxy_stream("field1").unwrap();
        let upstream = connector.last().unwrap();
        upstream.respond(200, Some("video/x-flv")).await;
        let mut stream = sub.wait_ready().await.unwrap();

        upstream.end().await;
        assert!(stream.body.next().await.unwrap().is_err());
        assert!(manager.state_of("field1").is_none());
    }

    #[tokio::test]
    async fn test_end_before_headers_is_connect_failure() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let sub = manager.proxy_stream("field1").unwrap();
        connector.last().unwrap().end().await;
        let err = sub.wait_ready().await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_disconnect_sends_503_to_waiting_clients() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let sub = manager.proxy_stream("field1").unwrap();
        assert!(manager.disconnect("field1"));
        assert!(!manager.disconnect("field1"));
        assert!(connector.last().unwrap().is_aborted());

        let err = sub.wait_ready().await.unwrap_err();
        assert_eq!(err, StreamError::Disconnected);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (manager, connector) = mock_manager(StreamSettings::default());

        let _sub = manager.proxy_stream("field1").unwrap();
        manager.shutdown();
        assert!(connector.last().unwrap().is_aborted());
        assert!(manager.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_http_camera_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/video"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "multipart/x-mixed-replace")
                    .set_body_bytes(b"JPEGDATA".to_vec()),
            )
            .mount(&server)
            .await;
        let address = server.address();
        let manager = http_manager(cameras(&address.ip().to_string(), address.port()), 15);

        let stream = manager.proxy_stream("field1").unwrap().wait_ready().await.unwrap();
        assert_eq!(
            stream.headers[http::header::CONTENT_TYPE],
            "multipart/x-mixed-replace"
        );

        let mut body = Vec::new();
        let mut chunks = stream.body;
        while let Some(Ok(chunk)) = chunks.next().await {
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"JPEGDATA");
    }

    #[tokio::test]
    async fn test_http_camera_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let manager = http_manager(cameras("127.0.0.1", port), 15);

        let err = manager.proxy_stream("field1").unwrap().wait_ready().await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().starts_with("Camera error"));
        assert_eq!(manager.state_of("field1"), Some(StreamState::Idle));
    }
}
