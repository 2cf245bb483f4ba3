use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MATCH_TYPE: &str = "match";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameState {
    Waiting,
    Recording,
}

/// Who started the current match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTrigger {
    Manual,
    /// Audio detector callback
    Automated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchEndedBy {
    Timer,
    Manual,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchEventType {
    MatchStart,
    MatchAbort,
}

/// External timing event (UI button or audio detector)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEvent {
    pub event_type: MatchEventType,
    #[serde(default)]
    pub match_number: Option<u64>,
    #[serde(default)]
    pub match_type: Option<String>,
    #[serde(default)]
    pub is_manual: bool,
}

impl MatchEvent {
    #[must_use]
    pub const fn start(is_manual: bool) -> Self {
        Self {
            event_type: MatchEventType::MatchStart,
            match_number: None,
            match_type: None,
            is_manual,
        }
    }

    #[must_use]
    pub const fn abort(is_manual: bool) -> Self {
        Self {
            event_type: MatchEventType::MatchAbort,
            match_number: None,
            match_type: None,
            is_manual,
        }
    }
}

/// Persisted match sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchState {
    pub current_match_number: u64,
    #[serde(default = "default_match_type")]
    pub match_type: String,
    #[serde(alias = "lastUpdate", default = "Utc::now")]
    pub last_update_timestamp: DateTime<Utc>,
}

fn default_match_type() -> String {
    DEFAULT_MATCH_TYPE.to_string()
}

impl Default for MatchState {
    fn default() -> Self {
        Self {
            current_match_number: 1,
            match_type: default_match_type(),
            last_update_timestamp: Utc::now(),
        }
    }
}

impl MatchState {
    #[must_use]
    pub fn identity(&self) -> MatchIdentity {
        MatchIdentity {
            number: self.current_match_number,
            match_type: self.match_type.clone(),
        }
    }

    /// Move on to the next match number after a completed or aborted match.
    pub fn advance(&mut self) {
        self.current_match_number = self.current_match_number.saturating_add(1);
        self.last_update_timestamp = Utc::now();
    }
}

/// Number + type label of one match, as used in recording file names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchIdentity {
    pub number: u64,
    pub match_type: String,
}

const MAX_MATCH_TYPE_LEN: usize = 32;

/// A match type is used verbatim in file names: ASCII letters, digits, `_`
/// and `-` only.
#[must_use]
pub fn is_valid_match_type(match_type: &str) -> bool {
    !match_type.is_empty()
        && match_type.len() <= MAX_MATCH_TYPE_LEN
        && match_type.bytes().all(is_file_name_byte)
}

const fn is_file_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Replace anything outside the file-name alphabet with `_`
fn file_name_part(part: &str) -> String {
    part.bytes()
        .map(|b| if is_file_name_byte(b) { char::from(b) } else { '_' })
        .collect()
}

impl MatchIdentity {
    /// `{type}{number}_{camera}_{YYYY-MM-DDTHH-MM-SS}.mp4`
    ///
    /// Always a single path component: separators and dots in the type or
    /// camera key are replaced.
    #[must_use]
    pub fn recording_file_name(&self, camera_key: &str, at: DateTime<Utc>) -> String {
        let match_type = if self.match_type.is_empty() {
            DEFAULT_MATCH_TYPE.to_string()
        } else {
            file_name_part(&self.match_type)
        };
        format!(
            "{}{}_{}_{}.mp4",
            match_type,
            self.number,
            file_name_part(camera_key),
            at.format("%Y-%m-%dT%H-%M-%S")
        )
    }
}
