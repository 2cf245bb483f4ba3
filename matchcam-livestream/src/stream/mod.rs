// Per-camera stream multiplexing.
//
// - CameraStream: one upstream connection and its client set
// - StreamManager: camera key -> CameraStream registry and the request entry point
// - Subscription/ClientBody: what an HTTP handler holds for one client
//
// Locking: a CameraStream's inner mutex may be held while touching the
// registry, never the other way around.

mod camera_stream;
mod manager;
mod sink;

pub use camera_stream::{StreamSettings, StreamState};
pub use manager::{StreamInfo, StreamManager};
pub use sink::{ClientBody, ReadyStream, Subscription};
