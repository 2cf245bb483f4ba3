// matchcam-recorder - match recording orchestration
//
// - process:      one external encoder child process and its supervisor task
// - manager:      camera key -> running recording table
// - orchestrator: WAITING/RECORDING match state machine driving the table

pub mod error;
pub mod manager;
pub mod orchestrator;
pub mod process;

pub use error::{RecorderError, RecorderResult};
pub use manager::RecordingManager;
pub use orchestrator::{MatchEventOutcome, MatchOrchestrator, MatchSnapshot};
pub use process::{RecordingEvent, RecordingInfo, RecordingProcess};
