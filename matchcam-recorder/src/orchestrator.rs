//! Match state machine
//!
//! WAITING --start--> RECORDING --timer | abort--> WAITING
//!
//! Every transition runs under one async mutex, so starts, aborts and timer
//! expiry are applied one at a time and recordings are started or stopped
//! while the transition still owns the state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use matchcam_core::models::{
    is_valid_match_type, GameState, MatchEndedBy, MatchEvent, MatchEventType, MatchIdentity,
    MatchState, MatchTrigger,
};
use matchcam_core::repository::MatchStateStore;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::RecorderResult;
use crate::manager::RecordingManager;
use crate::process::RecordingInfo;

struct OrchestratorState {
    game_state: GameState,
    match_state: MatchState,
    started_at: Option<DateTime<Utc>>,
    started_by: Option<MatchTrigger>,
    ended_by: Option<MatchEndedBy>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every start/abort so a stale timer can recognise itself
    generation: u64,
}

impl OrchestratorState {
    fn outcome(&self, accepted: bool) -> MatchEventOutcome {
        MatchEventOutcome {
            accepted,
            game_state: self.game_state,
            current_match_number: self.match_state.current_match_number,
            match_type: self.match_state.match_type.clone(),
            match_ended_by: self.ended_by,
        }
    }
}

/// Result of one external match event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEventOutcome {
    /// False when the event was ignored (start while already recording)
    pub accepted: bool,
    pub game_state: GameState,
    pub current_match_number: u64,
    pub match_type: String,
    pub match_ended_by: Option<MatchEndedBy>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub current_match_number: u64,
    pub match_type: String,
    pub game_state: GameState,
    pub is_recording: bool,
    pub match_started_at: Option<DateTime<Utc>>,
    pub started_by: Option<MatchTrigger>,
    pub match_ended_by: Option<MatchEndedBy>,
    pub active_recordings: Vec<RecordingInfo>,
}

pub struct MatchOrchestrator {
    recordings: Arc<RecordingManager>,
    store: Arc<dyn MatchStateStore>,
    duration: Duration,
    state: Mutex<OrchestratorState>,
}

impl MatchOrchestrator {
    pub fn new(
        recordings: Arc<RecordingManager>,
        store: Arc<dyn MatchStateStore>,
        initial: MatchState,
        duration: Duration,
    ) -> Arc<Self> {
        info!(
            match_number = initial.current_match_number,
            match_type = %initial.match_type,
            "Match orchestrator ready"
        );
        Arc::new(Self {
            recordings,
            store,
            duration,
            state: Mutex::new(OrchestratorState {
                game_state: GameState::Waiting,
                match_state: initial,
                started_at: None,
                started_by: None,
                ended_by: None,
                timer: None,
                generation: 0,
            }),
        })
    }

    #[must_use]
    pub fn recordings(&self) -> &Arc<RecordingManager> {
        &self.recordings
    }

    pub async fn handle_event(self: &Arc<Self>, event: MatchEvent) -> MatchEventOutcome {
        let trigger = if event.is_manual {
            MatchTrigger::Manual
        } else {
            MatchTrigger::Automated
        };
        info!(event = ?event.event_type, ?trigger, "Match event");

        match event.event_type {
            MatchEventType::MatchStart => {
                self.start_match(trigger, event.match_number, event.match_type)
                    .await
            }
            MatchEventType::MatchAbort => {
                let ended_by = if event.is_manual {
                    MatchEndedBy::Manual
                } else {
                    MatchEndedBy::System
                };
                self.abort_match(ended_by).await
            }
        }
    }

    /// Start recording every camera and arm the match timer.
    ///
    /// Ignored while a match is already recording. `number`/`match_type`
    /// override the current identity only when the start is accepted; a
    /// match type that is not a plain file-name label is dropped.
    pub async fn start_match(
        self: &Arc<Self>,
        trigger: MatchTrigger,
        number: Option<u64>,
        match_type: Option<String>,
    ) -> MatchEventOutcome {
        let mut state = self.state.lock().await;
        if state.game_state == GameState::Recording {
            info!(
                match_number = state.match_state.current_match_number,
                ?trigger,
                "Match already recording, ignoring start"
            );
            return state.outcome(false);
        }

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if let Some(number) = number {
            state.match_state.current_match_number = number;
        }
        match match_type.filter(|t| !t.is_empty()) {
            Some(match_type) if is_valid_match_type(&match_type) => {
                state.match_state.match_type = match_type;
            }
            Some(match_type) => {
                warn!(match_type = %match_type, "Ignoring invalid match type");
            }
            None => {}
        }

        state.game_state = GameState::Recording;
        state.started_at = Some(Utc::now());
        state.started_by = Some(trigger);
        state.ended_by = None;
        state.generation += 1;

        let identity = state.match_state.identity();
        info!(
            match_number = identity.number,
            match_type = %identity.match_type,
            ?trigger,
            "Match started"
        );
        self.start_all(&identity).await;

        let generation = state.generation;
        let orchestrator = Arc::clone(self);
        let duration = self.duration;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            orchestrator.on_timer(generation).await;
        }));
        state.outcome(true)
    }

    /// Stop the match (if any) and return to WAITING.
    ///
    /// The match number only advances when a match had actually started.
    pub async fn abort_match(&self, ended_by: MatchEndedBy) -> MatchEventOutcome {
        let mut state = self.state.lock().await;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;

        if state.game_state == GameState::Recording {
            warn!(
                match_number = state.match_state.current_match_number,
                ?ended_by,
                "Match aborted"
            );
        } else {
            info!(?ended_by, "Abort while waiting");
        }
        self.finish(&mut state, ended_by).await;
        state.outcome(true)
    }

    async fn on_timer(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation != generation || state.game_state != GameState::Recording {
            return;
        }
        // This task is the timer; dropping the handle does not cancel it
        state.timer = None;
        info!(
            match_number = state.match_state.current_match_number,
            duration_secs = self.duration.as_secs(),
            "Match time elapsed"
        );
        self.finish(&mut state, MatchEndedBy::Timer).await;
    }

    async fn finish(&self, state: &mut OrchestratorState, ended_by: MatchEndedBy) {
        self.recordings.stop_all();
        state.game_state = GameState::Waiting;
        state.ended_by = Some(ended_by);

        if state.started_at.take().is_some() {
            state.match_state.advance();
            info!(
                next_match = state.match_state.current_match_number,
                "Match complete"
            );
            if let Err(e) = self.store.save(&state.match_state).await {
                error!(error = %e, "Failed to persist match state");
            }
        }
    }

    async fn start_all(&self, identity: &MatchIdentity) {
        let cameras: Vec<String> = self.recordings.cameras().keys().cloned().collect();
        for camera in cameras {
            if let Err(e) = self.recordings.start(&camera, identity).await {
                warn!(camera = %camera, error = %e, "Recording not started");
            }
        }
    }

    /// Manual single-camera recording, named after the current match.
    pub async fn start_recording(&self, camera_key: &str) -> RecorderResult<RecordingInfo> {
        let identity = self.state.lock().await.match_state.identity();
        self.recordings.start(camera_key, &identity).await
    }

    pub fn stop_recording(&self, camera_key: &str) -> RecorderResult<()> {
        self.recordings.stop(camera_key)
    }

    pub async fn snapshot(&self) -> MatchSnapshot {
        let state = self.state.lock().await;
        MatchSnapshot {
            current_match_number: state.match_state.current_match_number,
            match_type: state.match_state.match_type.clone(),
            game_state: state.game_state,
            is_recording: state.game_state == GameState::Recording,
            match_started_at: state.started_at,
            started_by: state.started_by,
            match_ended_by: state.ended_by,
            active_recordings: self.recordings.active(),
        }
    }

    /// Process shutdown: stop every recording, wait for the encoders up to
    /// `grace`, persist the match state.
    pub async fn shutdown(&self, grace: Duration) -> RecorderResult<()> {
        let mut state = self.state.lock().await;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;

        let stopping = self.recordings.stop_all();
        if stopping > 0 && !self.recordings.wait_idle(grace).await {
            warn!("Encoders still running after grace period, killing them");
            self.recordings.kill_all();
        }

        self.store.save(&state.match_state).await?;
        info!(
            match_number = state.match_state.current_match_number,
            "Match state saved"
        );
        Ok(())
    }
}
