use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Camera key -> connection details. Loaded once, read-only afterwards.
pub type CameraMap = BTreeMap<String, CameraConfig>;

/// One network camera serving MJPEG/FLV over plain HTTP.
///
/// Accepts both the descriptive field names and the short ones used by the
/// UI's `config.json` (`name`, `ip`, `path`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(alias = "name", default)]
    pub display_name: String,
    #[serde(alias = "ip")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(alias = "path", default = "default_url_path")]
    pub url_path: String,
}

const fn default_port() -> u16 {
    80
}

fn default_url_path() -> String {
    "/".to_string()
}

impl CameraConfig {
    /// Upstream URL of the camera's live endpoint
    #[must_use]
    pub fn stream_url(&self) -> String {
        let path = if self.url_path.starts_with('/') {
            self.url_path.clone()
        } else {
            format!("/{}", self.url_path)
        };
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        let camera = CameraConfig {
            display_name: "Field 1".to_string(),
            host: "10.0.0.5".to_string(),
            port: 8080,
            url_path: "video".to_string(),
        };
        assert_eq!(camera.stream_url(), "http://10.0.0.5:8080/video");
    }

    #[test]
    fn test_short_field_aliases() {
        let camera: CameraConfig =
            serde_json::from_str(r#"{"name":"Red","ip":"10.0.0.7","port":81,"path":"/live.flv"}"#)
                .unwrap();
        assert_eq!(camera.display_name, "Red");
        assert_eq!(camera.host, "10.0.0.7");
        assert_eq!(camera.stream_url(), "http://10.0.0.7:81/live.flv");
    }
}
