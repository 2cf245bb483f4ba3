// Audio fingerprint database
//
// Only storage lives here; matching runs in the detector outside this server.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::write_atomic;
use crate::models::{Fingerprint, NewFingerprint};
use crate::{Error, Result};

pub struct FingerprintStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Fingerprint>>,
}

impl FingerprintStore {
    /// Open the database, starting empty if the file is missing or unreadable.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, Fingerprint>>(&bytes) {
                Ok(entries) => {
                    info!("Audio fingerprints database loaded: {} fingerprints", entries.len());
                    entries
                }
                Err(e) => {
                    warn!(path = %path.display(), "Could not parse fingerprints database: {}", e);
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub async fn list(&self) -> BTreeMap<String, Fingerprint> {
        self.entries.read().await.clone()
    }

    /// Insert or replace a fingerprint by name
    pub async fn insert(&self, new: NewFingerprint) -> Result<Fingerprint> {
        if new.name.trim().is_empty() {
            return Err(Error::InvalidInput("Fingerprint name must not be empty".to_string()));
        }

        let fingerprint = Fingerprint {
            mfcc: new.mfcc,
            description: new.description,
            created: Utc::now(),
        };

        let mut entries = self.entries.write().await;
        entries.insert(new.name.clone(), fingerprint.clone());
        self.persist(&entries).await?;

        info!("Saved fingerprint {} ({} coefficients)", new.name, fingerprint.mfcc.len());
        Ok(fingerprint)
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(name).is_none() {
            return Err(Error::NotFound(format!("Fingerprint {name}")));
        }
        self.persist(&entries).await?;

        info!("Deleted fingerprint {}", name);
        Ok(())
    }

    async fn persist(&self, entries: &BTreeMap<String, Fingerprint>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        write_atomic(&self.path, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> NewFingerprint {
        NewFingerprint {
            name: name.to_string(),
            mfcc: vec![0.1, 0.2, 0.3],
            description: Some("start buzzer".to_string()),
        }
    }

    #[tokio::test]
    async fn test_insert_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprints.json");

        let store = FingerprintStore::open(&path).await;
        store.insert(sample("buzzer")).await.unwrap();

        let reopened = FingerprintStore::open(&path).await;
        let entries = reopened.list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["buzzer"].mfcc.len(), 3);
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(dir.path().join("fingerprints.json")).await;

        assert!(matches!(store.remove("nope").await, Err(Error::NotFound(_))));

        store.insert(sample("buzzer")).await.unwrap();
        store.remove("buzzer").await.unwrap();
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(dir.path().join("fingerprints.json")).await;
        assert!(matches!(store.insert(sample("  ")).await, Err(Error::InvalidInput(_))));
    }
}
