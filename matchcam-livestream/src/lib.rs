// matchcam-livestream - camera stream multiplexing
//
// Architecture:
// - upstream/  - one HTTP GET per camera, surfaced as an ordered event channel
// - stream/    - per-camera state machine, client sinks and the stream registry
//
// At most one upstream connection exists per camera key; its bytes are fanned
// out to every subscribed HTTP client.

pub mod error;
pub mod stream;
pub mod upstream;

pub use error::{StreamError, StreamResult};
pub use stream::{
    ClientBody, ReadyStream, StreamInfo, StreamManager, StreamSettings, StreamState, Subscription,
};
pub use upstream::{
    HttpUpstreamConnector, MockUpstream, MockUpstreamConnector, UpstreamConnector, UpstreamError,
    UpstreamEvent, UpstreamHandle,
};
