use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use matchcam_core::config::RecordingConfig;
use matchcam_core::models::{CameraMap, MatchIdentity};
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tracing::{error, info, warn};

use crate::error::{RecorderError, RecorderResult};
use crate::process::{log_exit, ExitReport, RecordingEvent, RecordingInfo, RecordingProcess};

type RecordingTable = Arc<Mutex<HashMap<String, RecordingProcess>>>;

/// Camera key -> running encoder table.
///
/// At most one recording per camera. Entries are only removed by the exit
/// notification of their own process, so a camera stays "recording" until its
/// encoder has actually finished writing.
pub struct RecordingManager {
    cameras: Arc<CameraMap>,
    config: RecordingConfig,
    table: RecordingTable,
    events: broadcast::Sender<RecordingEvent>,
    exited: Arc<Notify>,
    next_id: AtomicU64,
}

impl RecordingManager {
    pub fn new(cameras: Arc<CameraMap>, config: RecordingConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            cameras,
            config,
            table: Arc::new(Mutex::new(HashMap::new())),
            events,
            exited: Arc::new(Notify::new()),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn cameras(&self) -> &CameraMap {
        &self.cameras
    }

    /// Start recording `camera_key` into a file named after `identity`.
    pub async fn start(
        &self,
        camera_key: &str,
        identity: &MatchIdentity,
    ) -> RecorderResult<RecordingInfo> {
        let camera = self
            .cameras
            .get(camera_key)
            .ok_or_else(|| RecorderError::CameraNotFound(camera_key.to_string()))?;

        if self.is_recording(camera_key) {
            info!(camera = %camera_key, "Already recording, ignoring start");
            return Err(RecorderError::AlreadyRecording(camera_key.to_string()));
        }

        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let path = self
            .config
            .output_dir
            .join(identity.recording_file_name(camera_key, Utc::now()));
        if path.parent() != Some(self.config.output_dir.as_path()) {
            return Err(RecorderError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("recording path escapes {}", self.config.output_dir.display()),
            )));
        }

        let mut table = self.table.lock();
        // Re-check under the lock; the directory await above is a gap
        if table.contains_key(camera_key) {
            info!(camera = %camera_key, "Already recording, ignoring start");
            return Err(RecorderError::AlreadyRecording(camera_key.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let on_exit = self.exit_handler(camera_key.to_string());
        let process = RecordingProcess::spawn(
            id,
            camera_key,
            identity,
            &camera.stream_url(),
            path,
            &self.config,
            on_exit,
        )
        .map_err(|source| {
            error!(camera = %camera_key, error = %source, "Failed to start encoder");
            RecorderError::ProcessSpawnFailure {
                camera: camera_key.to_string(),
                source,
            }
        })?;

        let info = process.info().clone();
        table.insert(camera_key.to_string(), process);
        drop(table);

        info!(
            camera = %camera_key,
            match_number = identity.number,
            path = %info.path.display(),
            pid = ?info.pid,
            "Recording started"
        );
        let _ = self.events.send(RecordingEvent::Started(info.clone()));
        Ok(info)
    }

    fn exit_handler(&self, camera_key: String) -> impl FnOnce(ExitReport) + Send + 'static {
        let table = Arc::clone(&self.table);
        let events = self.events.clone();
        let exited = Arc::clone(&self.exited);

        move |report: ExitReport| {
            log_exit(&report);
            {
                let mut table = table.lock();
                if table.get(&camera_key).is_some_and(|p| p.id() == report.id) {
                    table.remove(&camera_key);
                }
            }
            let _ = events.send(RecordingEvent::Exited {
                info: report.info,
                exit_code: report.exit_code,
                elapsed: report.elapsed,
                forced: report.forced,
            });
            exited.notify_waiters();
        }
    }

    /// Request a graceful stop. The entry stays until the encoder exits.
    pub fn stop(&self, camera_key: &str) -> RecorderResult<()> {
        let mut table = self.table.lock();
        let process = table
            .get_mut(camera_key)
            .ok_or_else(|| RecorderError::NotRecording(camera_key.to_string()))?;
        if !process.is_stopping() {
            info!(camera = %camera_key, "Stopping recording");
        }
        process.stop_graceful();
        Ok(())
    }

    /// Gracefully stop every recording; returns how many were asked to stop.
    pub fn stop_all(&self) -> usize {
        let mut table = self.table.lock();
        for process in table.values_mut() {
            process.stop_graceful();
        }
        if !table.is_empty() {
            info!(count = table.len(), "Stopping all recordings");
        }
        table.len()
    }

    /// Kill every encoder without waiting for it to finalize its file.
    pub fn kill_all(&self) {
        let mut table = self.table.lock();
        for (camera, process) in table.iter_mut() {
            warn!(camera = %camera, "Killing recording");
            process.stop_forced();
        }
    }

    #[must_use]
    pub fn is_recording(&self, camera_key: &str) -> bool {
        self.table.lock().contains_key(camera_key)
    }

    #[must_use]
    pub fn active(&self) -> Vec<RecordingInfo> {
        let mut active: Vec<RecordingInfo> =
            self.table.lock().values().map(|p| p.info().clone()).collect();
        active.sort_by(|a, b| a.camera.cmp(&b.camera));
        active
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RecordingEvent> {
        self.events.subscribe()
    }

    /// Wait until no recording is left, up to `timeout`. Returns true if idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let exited = self.exited.notified();
                if self.table.lock().is_empty() {
                    return;
                }
                exited.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
