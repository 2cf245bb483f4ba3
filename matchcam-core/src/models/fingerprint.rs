use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored audio fingerprint used by the browser-side match detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub mfcc: Vec<f64>,
    pub description: Option<String>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFingerprint {
    pub name: String,
    pub mfcc: Vec<f64>,
    #[serde(default)]
    pub description: Option<String>,
}
