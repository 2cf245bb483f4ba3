use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http::HeaderMap;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use super::camera_stream::CameraStream;
use crate::error::StreamError;

pub(crate) type ClientId = u64;
pub(crate) type BodyChunk = Result<Bytes, io::Error>;

/// First thing a client learns about its request
pub(crate) enum SinkStart {
    Headers(HeaderMap),
    Failed(StreamError),
}

/// Stream-side handle for one HTTP client.
///
/// Headers are delivered at most once through the oneshot; after that the
/// client only sees body chunks. Dropping the sink ends the client's body.
/// A failure after headers travels on its own oneshot so a full data buffer
/// cannot swallow it.
pub(crate) struct ClientSink {
    start: Option<oneshot::Sender<SinkStart>>,
    data: mpsc::Sender<BodyChunk>,
    failure: oneshot::Sender<StreamError>,
}

/// Receiving half of a [`ClientSink`]
pub(crate) struct SinkReceiver {
    pub(crate) start: oneshot::Receiver<SinkStart>,
    pub(crate) data: mpsc::Receiver<BodyChunk>,
    pub(crate) failure: oneshot::Receiver<StreamError>,
}

impl ClientSink {
    pub(crate) fn channel(buffer: usize) -> (Self, SinkReceiver) {
        let (start_tx, start) = oneshot::channel();
        let (data_tx, data) = mpsc::channel(buffer.max(1));
        let (failure_tx, failure) = oneshot::channel();
        let sink = Self {
            start: Some(start_tx),
            data: data_tx,
            failure: failure_tx,
        };
        (sink, SinkReceiver { start, data, failure })
    }

    pub(crate) const fn headers_sent(&self) -> bool {
        self.start.is_none()
    }

    /// Deliver the response headers; a no-op if they were already sent.
    /// Returns false when the client has gone away.
    pub(crate) fn send_headers(&mut self, headers: &HeaderMap) -> bool {
        match self.start.take() {
            Some(tx) => tx.send(SinkStart::Headers(headers.clone())).is_ok(),
            None => !self.data.is_closed(),
        }
    }

    /// Non-blocking write. False means the client is gone or not keeping up.
    pub(crate) fn offer(&self, chunk: &Bytes) -> bool {
        self.data.try_send(Ok(chunk.clone())).is_ok()
    }

    /// End this client's response with `error`.
    ///
    /// Before headers the error becomes the HTTP status; afterwards the body
    /// yields what was already buffered, then the error, so the client sees
    /// an incomplete transfer.
    pub(crate) fn terminate(mut self, error: StreamError) {
        if let Some(tx) = self.start.take() {
            let _ = tx.send(SinkStart::Failed(error));
        } else {
            let _ = self.failure.send(error);
        }
    }
}

/// Removes the client from its stream when dropped
pub(crate) struct SubscriptionGuard {
    stream: Arc<CameraStream>,
    client_id: ClientId,
}

impl SubscriptionGuard {
    pub(crate) const fn new(stream: Arc<CameraStream>, client_id: ClientId) -> Self {
        Self { stream, client_id }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.stream.unsubscribe(self.client_id);
    }
}

/// A client registered on a camera stream, waiting for the upstream response
pub struct Subscription {
    camera: String,
    receiver: SinkReceiver,
    guard: SubscriptionGuard,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("camera", &self.camera)
            .field("client_id", &self.guard.client_id)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub(crate) fn new(
        camera: String,
        receiver: SinkReceiver,
        guard: SubscriptionGuard,
    ) -> Self {
        Self {
            camera,
            receiver,
            guard,
        }
    }

    #[must_use]
    pub fn camera(&self) -> &str {
        &self.camera
    }

    #[must_use]
    pub const fn client_id(&self) -> u64 {
        self.guard.client_id
    }

    /// Wait until the camera answered (or failed).
    pub async fn wait_ready(self) -> Result<ReadyStream, StreamError> {
        let SinkReceiver {
            start,
            data,
            failure,
        } = self.receiver;
        match start.await {
            Ok(SinkStart::Headers(headers)) => Ok(ReadyStream {
                headers,
                body: ClientBody {
                    inner: ReceiverStream::new(data),
                    failure: Some(failure),
                    guard: self.guard,
                },
            }),
            Ok(SinkStart::Failed(error)) => Err(error),
            // Sink dropped without a word: the stream was torn down under us
            Err(_) => Err(StreamError::Disconnected),
        }
    }
}

/// Response headers plus the body stream for one client
#[derive(Debug)]
pub struct ReadyStream {
    pub headers: HeaderMap,
    pub body: ClientBody,
}

/// Body bytes for one client. Dropping it disconnects the client.
pub struct ClientBody {
    inner: ReceiverStream<BodyChunk>,
    failure: Option<oneshot::Receiver<StreamError>>,
    guard: SubscriptionGuard,
}

impl fmt::Debug for ClientBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBody")
            .field("client_id", &self.guard.client_id)
            .finish_non_exhaustive()
    }
}

impl Stream for ClientBody {
    type Item = BodyChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(None) => {}
            other => return other,
        }
        // Data channel closed: the sink is gone, so any failure was sent first
        let failure = self.failure.take().and_then(|mut rx| rx.try_recv().ok());
        Poll::Ready(failure.map(|error| Err(io::Error::other(error.to_string()))))
    }
}
