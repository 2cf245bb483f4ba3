//! Encoder child process supervision
//!
//! Each [`RecordingProcess`] owns a supervisor task that waits on the child,
//! reacts to stop requests and reports the exit through a callback. A graceful
//! stop writes `q` to the encoder's stdin; if the child is still alive after
//! the grace period it is killed.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use matchcam_core::config::RecordingConfig;
use matchcam_core::models::MatchIdentity;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn, Instrument};

const MAX_LOG_LINE: usize = 200;

/// Metadata of one recording, as exposed to the API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    pub camera: String,
    pub match_number: u64,
    pub match_type: String,
    pub file_name: String,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone)]
pub enum RecordingEvent {
    Started(RecordingInfo),
    Exited {
        info: RecordingInfo,
        exit_code: Option<i32>,
        elapsed: Duration,
        forced: bool,
    },
}

/// Everything the exit callback learns about a finished encoder
#[derive(Debug)]
pub(crate) struct ExitReport {
    pub(crate) id: u64,
    pub(crate) info: RecordingInfo,
    pub(crate) exit_code: Option<i32>,
    pub(crate) elapsed: Duration,
    pub(crate) forced: bool,
}

#[derive(Debug, Clone, Copy)]
enum StopMode {
    Graceful,
    Forced,
}

/// Handle to one running encoder invocation
pub struct RecordingProcess {
    id: u64,
    info: RecordingInfo,
    control: mpsc::Sender<StopMode>,
    stopping: bool,
}

impl RecordingProcess {
    /// Spawn the encoder and its supervisor.
    ///
    /// `on_exit` runs exactly once on the supervisor task after the child has
    /// been reaped, whatever the exit code.
    pub(crate) fn spawn<F>(
        id: u64,
        camera: &str,
        identity: &MatchIdentity,
        input_url: &str,
        path: PathBuf,
        encoder: &RecordingConfig,
        on_exit: F,
    ) -> std::io::Result<Self>
    where
        F: FnOnce(ExitReport) + Send + 'static,
    {
        let output = path.to_string_lossy().into_owned();
        let grace = encoder.graceful_stop();
        let args: Vec<String> = encoder
            .args
            .iter()
            .map(|arg| arg.replace("{input}", input_url).replace("{output}", &output))
            .collect();

        let mut child = Command::new(&encoder.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let info = RecordingInfo {
            camera: camera.to_string(),
            match_number: identity.number,
            match_type: identity.match_type.clone(),
            file_name,
            path,
            started_at: Utc::now(),
            pid: child.id(),
        };

        let span = tracing::info_span!("recording", camera = %camera, id);
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr).instrument(span.clone()));
        }

        let (control, control_rx) = mpsc::channel(4);
        let report_info = info.clone();
        tokio::spawn(
            async move {
                let started = Instant::now();
                let (status, forced) = supervise(child, control_rx, grace).await;
                let exit_code = status.ok().and_then(|s| s.code());
                on_exit(ExitReport {
                    id,
                    info: report_info,
                    exit_code,
                    elapsed: started.elapsed(),
                    forced,
                });
            }
            .instrument(span),
        );

        Ok(Self {
            id,
            info,
            control,
            stopping: false,
        })
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn info(&self) -> &RecordingInfo {
        &self.info
    }

    #[must_use]
    pub const fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Ask the encoder to finish the file and exit. Repeated calls are no-ops.
    pub fn stop_graceful(&mut self) {
        if self.stopping {
            return;
        }
        self.stopping = true;
        let _ = self.control.try_send(StopMode::Graceful);
    }

    /// Kill the encoder right away.
    pub fn stop_forced(&mut self) {
        self.stopping = true;
        let _ = self.control.try_send(StopMode::Forced);
    }
}

enum Step {
    Exited(std::io::Result<ExitStatus>),
    Quit,
    Kill(&'static str),
}

async fn supervise(
    mut child: Child,
    mut control: mpsc::Receiver<StopMode>,
    grace: Duration,
) -> (std::io::Result<ExitStatus>, bool) {
    let mut stdin = child.stdin.take();
    let mut deadline: Option<Instant> = None;
    let mut killed = false;

    loop {
        let step = tokio::select! {
            status = child.wait() => Step::Exited(status),
            mode = control.recv(), if !killed => match mode {
                Some(StopMode::Graceful) => Step::Quit,
                Some(StopMode::Forced) => Step::Kill("forced stop requested"),
                None => Step::Kill("recording handle dropped"),
            },
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                if deadline.is_some() && !killed => Step::Kill("grace period expired"),
        };

        match step {
            Step::Exited(status) => return (status, killed),
            Step::Quit => {
                if deadline.is_none() {
                    request_quit(stdin.take()).await;
                    deadline = Some(Instant::now() + grace);
                }
            }
            Step::Kill(reason) => {
                warn!(reason, "Killing encoder");
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "Failed to kill encoder");
                }
                killed = true;
            }
        }
    }
}

async fn request_quit(stdin: Option<ChildStdin>) {
    let Some(mut stdin) = stdin else {
        return;
    };
    if let Err(e) = stdin.write_all(b"q\n").await {
        // Already exiting; the grace deadline still applies
        debug!(error = %e, "Could not send quit to encoder");
        return;
    }
    let _ = stdin.flush().await;
    debug!("Sent quit to encoder");
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = truncate(line.trim(), MAX_LOG_LINE);
        if line.is_empty() {
            continue;
        }
        if line.contains("frame=") || line.contains("time=") {
            trace!(progress = %line, "encoder");
        } else {
            debug!(output = %line, "encoder");
        }
    }
}

fn truncate(line: &str, max: usize) -> &str {
    if line.len() <= max {
        return line;
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

pub(crate) fn log_exit(report: &ExitReport) {
    info!(
        camera = %report.info.camera,
        path = %report.info.path.display(),
        exit_code = ?report.exit_code,
        elapsed_secs = report.elapsed.as_secs_f64(),
        forced = report.forced,
        "Recording finished"
    );
}
