use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::CameraMap;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cameras: CameraMap,
    pub streaming: StreamingConfig,
    pub recording: RecordingConfig,
    pub matches: MatchConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Upstream camera connection and fan-out tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Time allowed for the camera to answer with a status line and headers
    pub connect_timeout_secs: u64,
    /// Maximum silence between two chunks once the stream is flowing
    pub read_timeout_secs: u64,
    /// Delay between the last client leaving and the upstream teardown.
    /// Zero tears the upstream down immediately.
    pub idle_grace_secs: u64,
    /// Chunks buffered per client before the client counts as unwritable
    pub client_buffer_chunks: usize,
    pub user_agent: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            read_timeout_secs: 30,
            idle_grace_secs: 0,
            client_buffer_chunks: 256,
            user_agent: "FRC-Replay-System/1.0".to_string(),
        }
    }
}

impl StreamingConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    #[must_use]
    pub const fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_secs)
    }
}

/// External encoder invocation used for match recordings.
///
/// `args` may contain the `{input}` and `{output}` placeholders, which are
/// substituted with the camera stream URL and the output file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub program: String,
    pub args: Vec<String>,
    pub output_dir: PathBuf,
    pub graceful_stop_secs: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: default_encoder_args(),
            output_dir: PathBuf::from("recordings"),
            graceful_stop_secs: 5,
        }
    }
}

impl RecordingConfig {
    #[must_use]
    pub const fn graceful_stop(&self) -> Duration {
        Duration::from_secs(self.graceful_stop_secs)
    }
}

fn default_encoder_args() -> Vec<String> {
    [
        "-y", "-i", "{input}",
        "-c:v", "copy", "-c:a", "aac", "-b:a", "128k",
        "-movflags", "+faststart", "-fflags", "+genpts",
        "-timeout", "10000000", "-reconnect", "1", "-reconnect_streamed", "1",
        "{output}",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub duration_secs: u64,
    pub state_path: PathBuf,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            duration_secs: 155,
            state_path: PathBuf::from("match_state.json"),
        }
    }
}

impl MatchConfig {
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

/// Paths of the small JSON documents owned by the UI side
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub threshold_path: PathBuf,
    pub fingerprints_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            threshold_path: PathBuf::from("threshold.json"),
            fingerprints_path: PathBuf::from("fingerprints.json"),
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // MATCHCAM_SERVER__PORT, MATCHCAM_STREAMING__IDLE_GRACE_SECS, ...
        builder = builder.add_source(
            Environment::with_prefix("MATCHCAM")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for misconfigurations that would make the server useless.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.cameras.is_empty() {
            errors.push("No cameras configured".to_string());
        }
        for (key, camera) in &self.cameras {
            if camera.host.is_empty() {
                errors.push(format!("Camera '{key}' has an empty host"));
            }
            if camera.port == 0 {
                errors.push(format!("Camera '{key}' has port 0"));
            }
        }
        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.recording.program.is_empty() {
            errors.push("recording.program must not be empty".to_string());
        }
        if self.matches.duration_secs == 0 {
            errors.push("matches.duration_secs must be non-zero".to_string());
        }
        if self.streaming.client_buffer_chunks == 0 {
            errors.push("streaming.client_buffer_chunks must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Locate and load the configuration file.
///
/// Search order:
/// 1. Explicit path (command line)
/// 2. `MATCHCAM_CONFIG_PATH` environment variable
/// 3. ./config.yaml, then ./config.json (the camera file the UI ships with)
/// 4. Environment variables only
pub fn load_config(explicit_path: Option<&str>) -> anyhow::Result<Config> {
    let config_path = explicit_path
        .map(ToString::to_string)
        .or_else(|| {
            std::env::var("MATCHCAM_CONFIG_PATH")
                .ok()
                .filter(|p| Path::new(p).exists())
        })
        .or_else(|| {
            ["config.yaml", "config.json"]
                .into_iter()
                .find(|p| Path::new(p).exists())
                .map(ToString::to_string)
        });

    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env()?
    };

    if let Err(errors) = config.validate() {
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CameraConfig;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.streaming.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.streaming.idle_grace(), Duration::ZERO);
        assert_eq!(config.matches.duration(), Duration::from_secs(155));
        assert_eq!(config.recording.graceful_stop(), Duration::from_secs(5));
        assert_eq!(config.recording.program, "ffmpeg");
        assert!(config.recording.args.iter().any(|a| a == "{input}"));
        assert_eq!(config.recording.args.last().map(String::as_str), Some("{output}"));
    }

    #[test]
    fn test_validate_requires_cameras() {
        let config = Config::default();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("No cameras")));
    }

    #[test]
    fn test_validate_ok() {
        let mut config = Config::default();
        config.cameras.insert(
            "field1".to_string(),
            CameraConfig {
                display_name: "Field 1".to_string(),
                host: "10.0.0.5".to_string(),
                port: 8080,
                url_path: "/video".to_string(),
            },
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.http_address(), "0.0.0.0:3000");
    }

    #[test]
    fn test_load_json_camera_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "cameras": {{
                    "field1": {{ "name": "Field 1", "ip": "10.0.0.5", "port": 8080, "path": "/video" }}
                }},
                "streaming": {{ "idle_grace_secs": 30 }}
            }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        let camera = &config.cameras["field1"];
        assert_eq!(camera.display_name, "Field 1");
        assert_eq!(camera.stream_url(), "http://10.0.0.5:8080/video");
        assert_eq!(config.streaming.idle_grace_secs, 30);
        // untouched sections keep their defaults
        assert_eq!(config.streaming.connect_timeout_secs, 15);
    }
}
