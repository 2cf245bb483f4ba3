// Match sequence persistence
//
// Read once at startup, written by the orchestrator at match boundaries.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use super::write_atomic;
use crate::models::MatchState;
use crate::Result;

#[async_trait]
pub trait MatchStateStore: Send + Sync {
    /// Load the persisted state, `None` when nothing was saved yet
    async fn load(&self) -> Result<Option<MatchState>>;

    async fn save(&self, state: &MatchState) -> Result<()>;
}

/// `match_state.json` on disk
pub struct FileMatchStateStore {
    path: PathBuf,
    // serializes concurrent saves so the rename order matches the call order
    write_lock: tokio::sync::Mutex<()>,
}

impl FileMatchStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the state, falling back to match 1 on a missing or corrupt file.
    pub async fn load_or_default(&self) -> MatchState {
        match self.load().await {
            Ok(Some(state)) => {
                info!(
                    match_number = state.current_match_number,
                    "Loaded match state: next match will be #{}",
                    state.current_match_number
                );
                state
            }
            Ok(None) => MatchState::default(),
            Err(e) => {
                warn!(path = %self.path.display(), "Could not read match state, starting from match 1: {}", e);
                MatchState::default()
            }
        }
    }
}

#[async_trait]
impl MatchStateStore for FileMatchStateStore {
    async fn load(&self) -> Result<Option<MatchState>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &MatchState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let bytes = serde_json::to_vec(state)?;
        write_atomic(&self.path, &bytes).await
    }
}

/// In-memory store for tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryMatchStateStore {
    state: Mutex<Option<MatchState>>,
    saves: AtomicUsize,
}

impl MemoryMatchStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_state(state: MatchState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Option<MatchState> {
        self.state.lock().clone()
    }
}

#[async_trait]
impl MatchStateStore for MemoryMatchStateStore {
    async fn load(&self) -> Result<Option<MatchState>> {
        Ok(self.state.lock().clone())
    }

    async fn save(&self, state: &MatchState) -> Result<()> {
        *self.state.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMatchStateStore::new(dir.path().join("match_state.json"));

        assert!(store.load().await.unwrap().is_none());

        let mut state = MatchState::default();
        state.advance();
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.current_match_number, 2);
        assert_eq!(loaded.match_type, "match");
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("match_state.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = FileMatchStateStore::new(path);
        assert!(store.load().await.is_err());
        assert_eq!(store.load_or_default().await.current_match_number, 1);
    }

    #[tokio::test]
    async fn test_memory_store_counts_saves() {
        let store = MemoryMatchStateStore::new();
        assert!(store.load().await.unwrap().is_none());
        store.save(&MatchState::default()).await.unwrap();
        store.save(&MatchState::default()).await.unwrap();
        assert_eq!(store.save_count(), 2);
        assert!(store.current().is_some());
    }
}
