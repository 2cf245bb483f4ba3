use std::time::Duration;

use matchcam_core::config::StreamingConfig;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

use super::{UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamHandle};
use crate::error::StreamError;

const EVENT_BUFFER: usize = 64;

/// Plain HTTP GET against the camera's MJPEG/FLV endpoint
#[derive(Clone)]
pub struct HttpUpstreamConnector {
    client: reqwest::Client,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HttpUpstreamConnector {
    pub fn new(config: &StreamingConfig) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| StreamError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        })
    }

    async fn pump(&self, url: &str, tx: &mpsc::Sender<UpstreamEvent>) {
        info!("Connecting to camera");

        // Covers TCP connect plus the status line and headers
        let response =
            match tokio::time::timeout(self.connect_timeout, self.client.get(url).send()).await {
                Err(_) => {
                    let _ = tx
                        .send(UpstreamEvent::Error(UpstreamError::ConnectTimeout(
                            self.connect_timeout,
                        )))
                        .await;
                    return;
                }
                Ok(Err(e)) => {
                    let error = if e.is_timeout() {
                        UpstreamError::ConnectTimeout(self.connect_timeout)
                    } else {
                        UpstreamError::Network(e.to_string())
                    };
                    let _ = tx.send(UpstreamEvent::Error(error)).await;
                    return;
                }
                Ok(Ok(response)) => response,
            };

        let status = response.status();
        let headers = response.headers().clone();
        if tx.send(UpstreamEvent::Headers { status, headers }).await.is_err() {
            return;
        }
        if !status.is_success() {
            // Consumer decides what a non-200 means; dropping the response closes it
            return;
        }

        let mut response = response;
        loop {
            match tokio::time::timeout(self.read_timeout, response.chunk()).await {
                Err(_) => {
                    warn!(timeout = ?self.read_timeout, "Camera stopped sending data");
                    let _ = tx
                        .send(UpstreamEvent::Error(UpstreamError::ReadTimeout(self.read_timeout)))
                        .await;
                    return;
                }
                Ok(Ok(Some(chunk))) => {
                    if tx.send(UpstreamEvent::Data(chunk)).await.is_err() {
                        return;
                    }
                }
                Ok(Ok(None)) => {
                    let _ = tx.send(UpstreamEvent::End).await;
                    return;
                }
                Ok(Err(e)) => {
                    let _ = tx
                        .send(UpstreamEvent::Error(UpstreamError::Network(e.to_string())))
                        .await;
                    return;
                }
            }
        }
    }
}

impl UpstreamConnector for HttpUpstreamConnector {
    fn connect(&self, url: &str) -> (UpstreamHandle, mpsc::Receiver<UpstreamEvent>) {
        let handle = UpstreamHandle::new();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let connector = self.clone();
        let url = url.to_string();
        let abort = handle.clone();
        let span = tracing::info_span!("upstream", url = %url);

        tokio::spawn(
            async move {
                tokio::select! {
                    () = abort.aborted() => debug!("Upstream connection aborted"),
                    () = connector.pump(&url, &tx) => {}
                }
            }
            .instrument(span),
        );

        (handle, rx)
    }
}
