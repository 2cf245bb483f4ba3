use std::time::Duration;

use matchcam_api::{create_router, AppState};
use matchcam_core::Config;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Recording teardown gets the encoder grace period plus this much slack
const SHUTDOWN_SLACK: Duration = Duration::from_secs(5);

pub struct MatchCamServer {
    config: Config,
    state: AppState,
}

impl MatchCamServer {
    pub const fn new(config: Config, state: AppState) -> Self {
        Self { config, state }
    }

    /// Serve HTTP until a shutdown signal, then finalize recordings
    pub async fn start(self) -> anyhow::Result<()> {
        let http_address = self.config.http_address();
        let listener = TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        let router = create_router(self.state.clone());
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(self.drain_on_signal())
            .await;
        if let Err(e) = &served {
            error!("HTTP server error: {}", e);
        }

        self.shutdown().await;
        served.map_err(Into::into)
    }

    /// Resolves on SIGINT/SIGTERM after cutting off live viewers, so the
    /// HTTP drain is not held open by endless stream bodies.
    fn drain_on_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let streams = self.state.streams.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, starting graceful shutdown...");
            streams.shutdown();
        }
    }

    async fn shutdown(&self) {
        info!("Shutting down MatchCam server...");
        let grace = self.config.recording.graceful_stop();

        let orchestrator = self.state.orchestrator.clone();
        match tokio::time::timeout(grace + SHUTDOWN_SLACK, orchestrator.shutdown(grace)).await {
            Ok(Ok(())) => info!("Recordings finalized"),
            Ok(Err(e)) => error!("Failed to persist match state on shutdown: {}", e),
            Err(_) => {
                warn!("Recording shutdown timed out, killing remaining encoders");
                orchestrator.recordings().kill_all();
            }
        }

        self.state.streams.shutdown();
        info!("MatchCam server stopped");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
