pub mod camera;
pub mod fingerprint;
pub mod matches;

pub use camera::{CameraConfig, CameraMap};
pub use fingerprint::{Fingerprint, NewFingerprint};
pub use matches::{
    is_valid_match_type, GameState, MatchEndedBy, MatchEvent, MatchEventType, MatchIdentity,
    MatchState, MatchTrigger,
};
