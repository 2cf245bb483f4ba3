// Audio detection threshold, stored verbatim for the detector UI

use serde_json::{json, Value};
use std::path::PathBuf;

use super::write_atomic;
use crate::Result;

const DEFAULT_THRESHOLD: u32 = 20;

pub struct ThresholdStore {
    path: PathBuf,
}

impl ThresholdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Stored document, or `{"threshold": 20}` when nothing readable exists
    pub async fn get(&self) -> Value {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| json!({ "threshold": DEFAULT_THRESHOLD })),
            Err(_) => json!({ "threshold": DEFAULT_THRESHOLD }),
        }
    }

    pub async fn set(&self, value: &Value) -> Result<()> {
        write_atomic(&self.path, &serde_json::to_vec(value)?).await
    }
}
